//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the blackboard state handlers read from and write to:
//! the sensor snapshot taken before the tick, the three brew timers, the
//! configuration, and the side effects a handler requests.  Handlers
//! never touch hardware; the brew service applies [`BrewCommands`] after
//! the tick.

use std::time::Duration;

use crate::config::SystemConfig;
use crate::fsm::BrewState;
use crate::fsm::stopwatch::Stopwatch;
use crate::sensors::flow::FlowState;
use crate::sensors::ranger::RangeSample;

// ---------------------------------------------------------------------------
// Sensor snapshot (read-only to state handlers)
// ---------------------------------------------------------------------------

/// Every sensor value the state machine looks at, taken once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSnapshot {
    /// Boiler temperature (°C).
    pub temperature_c: f64,
    /// Regulator target (°C).
    pub target_c: f64,

    pub flow_state: FlowState,
    /// Raw volume of the current flow episode (mL).
    pub flow_volume_ml: f64,
    /// Flow rate (mL/s).
    pub flow_speed_ml_s: f64,

    /// Smoothed distance to the water surface.
    pub tank: RangeSample,

    /// Pump relay state as last written.
    pub pump_on: bool,
}

// ---------------------------------------------------------------------------
// Side effects (written by handlers; applied by the brew service)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotLogAction {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrewCommands {
    /// Desired pump relay state, if it should change.
    pub pump: Option<bool>,
    /// Re-select the regulator gains and target for the current state.
    pub refresh_regulator: bool,
    pub shot_log: Option<ShotLogAction>,
}

impl BrewCommands {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct BrewTimers {
    /// Started at construction, never reset.
    pub system: Stopwatch,
    /// Running only during an extraction.
    pub extraction: Stopwatch,
    /// Time since the last extraction ended.
    pub idle: Stopwatch,
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

pub struct FsmContext {
    /// Clock reading for this tick.
    pub now: Duration,

    pub sensors: SensorSnapshot,
    pub commands: BrewCommands,
    pub timers: BrewTimers,
    pub config: SystemConfig,
}

impl FsmContext {
    /// New context with the system timer running from `now`.
    pub fn new(config: SystemConfig, now: Duration) -> Self {
        Self {
            now,
            sensors: SensorSnapshot::default(),
            commands: BrewCommands::default(),
            timers: BrewTimers {
                system: Stopwatch::started(now),
                ..BrewTimers::default()
            },
            config,
        }
    }

    pub fn system_time(&self) -> Duration {
        self.timers.system.elapsed(self.now)
    }

    pub fn extraction_time(&self) -> Duration {
        self.timers.extraction.elapsed(self.now)
    }

    pub fn idle_time(&self) -> Duration {
        self.timers.idle.elapsed(self.now)
    }

    /// Priming volume subtracted in an automatic extraction state.
    pub fn flow_offset_ml(&self, state: BrewState) -> f64 {
        match state {
            BrewState::ExtractingOneCup => self.config.flow_offset_one_cup_ml,
            BrewState::ExtractingTwoCups => self.config.flow_offset_two_cups_ml,
            _ => 0.0,
        }
    }

    /// Raw volume minus the state's priming offset, never negative.
    pub fn corrected_volume_ml(&self, state: BrewState) -> f64 {
        (self.sensors.flow_volume_ml - self.flow_offset_ml(state)).max(0.0)
    }

    /// Close out an extraction: stop its timer and restart the idle timer.
    pub fn finish_extraction(&mut self) {
        self.timers.extraction.stop(self.now);
        self.timers.idle.reset(self.now);
        self.timers.idle.start(self.now);
        self.commands.shot_log = Some(ShotLogAction::Close);
    }
}
