//! Brew service, the hexagonal core.
//!
//! [`BrewService`] owns the FSM, its context, the pump and the open shot
//! log.  It never reads a sensor itself: the caller hands it a
//! [`SensorSnapshot`] per tick, and every change the regulator should
//! see comes back as a [`RegulatorRequest`] for the caller to apply.
//! That keeps the service free of cross-component locking and fully
//! testable with a manual clock and a mock pump.
//!
//! ```text
//!  SensorSnapshot ──▶ ┌──────────────────────┐ ──▶ EventSink
//!                     │     BrewService      │
//!  BrewCommand ─────▶ │  FSM · timers · shot │ ──▶ RegulatorRequest
//!                     └──────────┬───────────┘
//!                                ▼
//!                             PumpPort
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::SystemConfig;
use crate::control::regulator::RegulatorSettings;
use crate::fsm::context::{FsmContext, SensorSnapshot, ShotLogAction};
use crate::fsm::states::build_state_table;
use crate::fsm::{BrewState, Fsm, Transition};
use crate::sensors::ranger::tank_level;

use super::commands::{BrewCommand, CupSize};
use super::events::{AppEvent, ShotKind, ShotReport, TelemetryRecord};
use super::ports::{Clock, EventSink, HeaterControl, PumpPort};

// ───────────────────────────────────────────────────────────────
// Regulator hand-off
// ───────────────────────────────────────────────────────────────

/// Changes the regulator should pick up.  Applied by the caller once the
/// service lock is released.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegulatorRequest {
    pub power: Option<bool>,
    pub settings: Option<RegulatorSettings>,
}

impl RegulatorRequest {
    pub fn is_empty(&self) -> bool {
        self.power.is_none() && self.settings.is_none()
    }

    pub fn apply(&self, heater: &dyn HeaterControl) {
        if let Some(settings) = self.settings {
            heater.apply(settings);
        }
        if let Some(on) = self.power {
            heater.set_power(on);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Shot log buffer
// ───────────────────────────────────────────────────────────────

struct ShotLog {
    kind: ShotKind,
    records: Vec<TelemetryRecord>,
    last_sample: Option<Duration>,
}

fn due(last: Option<Duration>, now: Duration, interval: Duration) -> bool {
    last.is_none_or(|t| now.saturating_sub(t) >= interval)
}

// ───────────────────────────────────────────────────────────────
// BrewService
// ───────────────────────────────────────────────────────────────

pub struct BrewService {
    fsm: Fsm,
    ctx: FsmContext,
    pump: Box<dyn PumpPort>,
    clock: Arc<dyn Clock>,
    power_enabled: bool,
    shot: Option<ShotLog>,
    last_telemetry: Option<Duration>,
}

impl BrewService {
    /// Construct the service.  The system timer starts now.
    ///
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: SystemConfig, pump: Box<dyn PumpPort>, clock: Arc<dyn Clock>) -> Self {
        let initial = if config.heating_enabled {
            BrewState::Heating
        } else {
            BrewState::Deactivated
        };
        let power_enabled = config.heating_enabled;
        let ctx = FsmContext::new(config, clock.now());
        let fsm = Fsm::new(build_state_table(), initial);

        Self {
            fsm,
            ctx,
            pump,
            clock,
            power_enabled,
            shot: None,
            last_telemetry: None,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter the initial state.  The returned request carries the full
    /// regulator profile and power.
    pub fn start(&mut self, sink: &mut dyn EventSink) -> RegulatorRequest {
        self.ctx.now = self.clock.now();
        self.fsm.start(&mut self.ctx);
        self.ctx.commands.clear();

        let state = self.fsm.current_state();
        sink.emit(&AppEvent::Started(state));
        info!("BrewService started in {}", state);

        RegulatorRequest {
            power: Some(self.power_enabled),
            settings: Some(self.profile()),
        }
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One control cycle: snapshot → FSM → pump / shot log → telemetry.
    pub fn tick(&mut self, sensors: SensorSnapshot, sink: &mut dyn EventSink) -> RegulatorRequest {
        self.ctx.now = self.clock.now();
        self.ctx.sensors = SensorSnapshot {
            pump_on: self.pump.power(),
            ..sensors
        };

        if let Some((from, to)) = self.fsm.tick(&mut self.ctx) {
            sink.emit(&AppEvent::StateChanged { from, to });
        }
        let request = self.apply_commands(sink);
        self.record(sink);
        request
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn handle_command(&mut self, cmd: BrewCommand, sink: &mut dyn EventSink) -> RegulatorRequest {
        match cmd {
            BrewCommand::Power(on) => self.power(on, sink),
            BrewCommand::Extract(cup) => self.extract(cup, sink),
            BrewCommand::SetSteamMode(on) => self.set_steam_mode(on, sink),
        }
    }

    /// Machine on (Heating) or off (Deactivated).  Always legal; an
    /// extraction in progress is ended first.
    pub fn power(&mut self, on: bool, sink: &mut dyn EventSink) -> RegulatorRequest {
        self.ctx.now = self.clock.now();
        if self.fsm.current_state().is_extracting() {
            warn!("Power {} during extraction, stopping pump", if on { "on" } else { "off" });
            self.ctx.commands.pump = Some(false);
            self.ctx.finish_extraction();
        }

        self.power_enabled = on;
        let target = if on {
            BrewState::Heating
        } else {
            BrewState::Deactivated
        };
        self.transition(Transition::Switch(target), sink);

        let mut request = self.apply_commands(sink);
        request.power = Some(on);
        if on {
            request.settings = Some(self.profile());
        }
        request
    }

    /// Start an automatic extraction.  Refused during Steam and while
    /// another extraction runs.
    pub fn extract(&mut self, cup: CupSize, sink: &mut dyn EventSink) -> RegulatorRequest {
        let state = self.fsm.current_state();
        if state.is_extracting() || state == BrewState::Steam {
            warn!("Extraction refused in {}", state);
            return RegulatorRequest::default();
        }

        self.ctx.now = self.clock.now();
        self.ctx.timers.extraction.reset(self.ctx.now);
        self.transition(Transition::Enter(cup.state()), sink);
        self.ctx.commands.pump = Some(true);
        self.ctx.commands.shot_log = Some(ShotLogAction::Open);
        self.apply_commands(sink)
    }

    /// Enter or leave Steam.  Entering is refused while deactivated or
    /// extracting; leaving only applies in Steam.
    pub fn set_steam_mode(&mut self, on: bool, sink: &mut dyn EventSink) -> RegulatorRequest {
        let state = self.fsm.current_state();
        self.ctx.now = self.clock.now();
        if on {
            if state == BrewState::Deactivated || state == BrewState::Steam || state.is_extracting() {
                warn!("Steam mode refused in {}", state);
                return RegulatorRequest::default();
            }
            self.transition(Transition::Enter(BrewState::Steam), sink);
        } else {
            if state != BrewState::Steam {
                return RegulatorRequest::default();
            }
            self.transition(Transition::Resume, sink);
        }
        self.apply_commands(sink)
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> BrewState {
        self.fsm.current_state()
    }

    pub fn previous_state(&self) -> BrewState {
        self.fsm.previous_state()
    }

    pub fn power_enabled(&self) -> bool {
        self.power_enabled
    }

    pub fn steam_mode(&self) -> bool {
        self.state() == BrewState::Steam
    }

    pub fn pump_on(&self) -> bool {
        self.pump.power()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.ctx.config
    }

    /// Snapshot the last tick ran against.
    pub fn sensors(&self) -> SensorSnapshot {
        self.ctx.sensors
    }

    pub fn system_time(&self) -> Duration {
        self.ctx.timers.system.elapsed(self.clock.now())
    }

    pub fn idle_time(&self) -> Duration {
        self.ctx.timers.idle.elapsed(self.clock.now())
    }

    pub fn extraction_time(&self) -> Duration {
        self.ctx.timers.extraction.elapsed(self.clock.now())
    }

    pub fn extraction_running(&self) -> bool {
        self.ctx.timers.extraction.is_running()
    }

    /// Preheat time still to go; zero once passed.
    pub fn heating_rest_time(&self) -> Duration {
        self.ctx
            .config
            .preheat_duration()
            .saturating_sub(self.system_time())
    }

    /// Offset-corrected volume of the current extraction (mL).
    pub fn extraction_volume(&self) -> f64 {
        self.ctx.corrected_volume_ml(self.state())
    }

    /// Gains and target the regulator should run with in this state.
    pub fn profile(&self) -> RegulatorSettings {
        match self.state() {
            BrewState::Steam => RegulatorSettings::steam(&self.ctx.config),
            BrewState::Heating => RegulatorSettings::preheat(&self.ctx.config),
            _ => RegulatorSettings::brew(&self.ctx.config),
        }
    }

    /// Current values as a log record.
    pub fn telemetry(&self) -> TelemetryRecord {
        let s = &self.ctx.sensors;
        TelemetryRecord {
            system_secs: self.system_time().as_secs_f64(),
            extraction_secs: self.extraction_time().as_secs_f64(),
            temperature_c: s.temperature_c,
            target_c: s.target_c,
            raw_volume_ml: s.flow_volume_ml,
            volume_ml: self.extraction_volume(),
            flow_speed_ml_s: s.flow_speed_ml_s,
            flow_state: s.flow_state.as_str(),
            state: self.state(),
            water_level: tank_level(
                s.tank,
                self.ctx.config.tank_empty_m,
                self.ctx.config.tank_full_m,
            ),
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn transition(&mut self, transition: Transition, sink: &mut dyn EventSink) {
        let (from, to) = self.fsm.apply(transition, &mut self.ctx);
        sink.emit(&AppEvent::StateChanged { from, to });
    }

    /// Carry out what the handlers asked for and return the regulator part.
    fn apply_commands(&mut self, sink: &mut dyn EventSink) -> RegulatorRequest {
        let cmds = self.ctx.commands;
        self.ctx.commands.clear();

        if let Some(on) = cmds.pump {
            if let Err(e) = self.pump.set_power(on) {
                error!("Pump write failed: {}", e);
            }
        }

        match cmds.shot_log {
            Some(ShotLogAction::Open) => self.open_shot_log(),
            Some(ShotLogAction::Close) => self.close_shot_log(sink),
            None => {}
        }

        RegulatorRequest {
            power: None,
            settings: cmds.refresh_regulator.then(|| self.profile()),
        }
    }

    fn open_shot_log(&mut self) {
        if !self.ctx.config.logging {
            return;
        }
        self.shot = Some(ShotLog {
            kind: ShotKind::for_state(self.state()),
            records: Vec::new(),
            last_sample: None,
        });
    }

    fn close_shot_log(&mut self, sink: &mut dyn EventSink) {
        let Some(shot) = self.shot.take() else {
            return;
        };
        let extraction_secs = self.ctx.extraction_time().as_secs_f64();
        if extraction_secs < self.ctx.config.min_shot_secs {
            info!("Shot discarded after {:.1}s", extraction_secs);
            sink.emit(&AppEvent::ShotDiscarded { extraction_secs });
            return;
        }
        let report = ShotReport {
            kind: shot.kind,
            extraction_secs,
            volume_ml: self.ctx.corrected_volume_ml(shot.kind.state()),
            records: shot.records,
        };
        sink.emit(&AppEvent::ShotCompleted(report));
    }

    /// System log at the coarse cadence, shot log at the fine one.
    fn record(&mut self, sink: &mut dyn EventSink) {
        if !self.ctx.config.logging {
            return;
        }
        let now = self.ctx.now;
        let system_interval = Duration::from_millis(u64::from(self.ctx.config.system_log_interval_ms));
        let shot_interval = Duration::from_millis(u64::from(self.ctx.config.shot_log_interval_ms));
        let extracting = self.state().is_extracting();

        let record = self.telemetry();
        if due(self.last_telemetry, now, system_interval) {
            self.last_telemetry = Some(now);
            sink.emit(&AppEvent::Telemetry(record));
        }
        if let Some(shot) = self.shot.as_mut() {
            if extracting && due(shot.last_sample, now, shot_interval) {
                shot.last_sample = Some(now);
                shot.records.push(record);
            }
        }
    }
}
