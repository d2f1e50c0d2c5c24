//! Threaded brew controller.
//!
//! [`BrewController`] opens every hardware component, wires them into a
//! [`BrewService`] and drives it from a 25 ms worker.  Each tick:
//!
//! 1. read temperature, flow, range and regulator target (no locks held)
//! 2. lock the service, tick it, unlock
//! 3. hand the regulator request to the regulator
//!
//! Commands from other threads take the same path.  The service lock is
//! never held while another component is called.
//!
//! Teardown order is field order: worker, flow meter, regulator (boiler
//! to 0), ranger, service (pump off), temperature decoder.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::info;

use crate::config::SystemConfig;
use crate::control::regulator::{Regulator, RegulatorConfig};
use crate::drivers::boiler::BoilerDriver;
use crate::drivers::pin::{OutputLine, PwmLine};
use crate::drivers::pump::PumpDriver;
use crate::drivers::worker::{Worker, period_ms, sleep_until};
use crate::error::Result;
use crate::fsm::BrewState;
use crate::fsm::context::SensorSnapshot;
use crate::sensors::flow::{FlowConfig, FlowMeter, FlowSample};
use crate::sensors::ranger::{Ranger, RangerConfig, tank_level};
use crate::sensors::tsic::{TemperatureDecoder, TemperatureSample, TsicConfig};
use crate::sync::lock;

use super::commands::{BrewCommand, CupSize};
use super::events::TelemetryRecord;
use super::ports::{
    Clock, EventSink, FlowProbe, GpioPort, HeaterControl, PumpPort, RangeProbe, TemperatureProbe,
};
use super::service::{BrewService, RegulatorRequest};

/// Already-opened components handed to [`BrewController::assemble`].
pub struct Components {
    pub temperature: Arc<dyn TemperatureProbe>,
    pub flow: Arc<dyn FlowProbe>,
    pub ranger: Arc<dyn RangeProbe>,
    pub heater: Arc<dyn HeaterControl>,
    pub pump: Box<dyn PumpPort>,
}

struct Shared {
    service: Mutex<BrewService>,
    sink: Mutex<Box<dyn EventSink>>,
    /// Serialises service calls with their regulator hand-off so requests
    /// reach the regulator in the order the service produced them.
    sequencer: Mutex<()>,
}

impl Shared {
    fn run(
        &self,
        heater: &dyn HeaterControl,
        step: impl FnOnce(&mut BrewService, &mut dyn EventSink) -> RegulatorRequest,
    ) {
        let _order = lock(&self.sequencer);
        let request = {
            let mut service = lock(&self.service);
            let mut sink = lock(&self.sink);
            step(&mut *service, &mut **sink)
        };
        if !request.is_empty() {
            request.apply(heater);
        }
    }
}

pub struct BrewController {
    worker: Worker,
    flow: Arc<dyn FlowProbe>,
    heater: Arc<dyn HeaterControl>,
    ranger: Arc<dyn RangeProbe>,
    shared: Arc<Shared>,
    temperature: Arc<dyn TemperatureProbe>,
    config: SystemConfig,
}

impl BrewController {
    /// Open all hardware on `gpio` and start the control loop.
    ///
    /// Fails without starting anything if a component is not ready;
    /// components opened before the failure are closed again in reverse
    /// order.
    pub fn open(
        config: SystemConfig,
        gpio: Arc<dyn GpioPort>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn EventSink>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let temperature = Arc::new(
            TemperatureDecoder::open(Arc::clone(&gpio), TsicConfig::from_system(&config))
                .context("temperature sensor not ready")?,
        );
        let boiler = BoilerDriver::open(PwmLine::new(
            Arc::clone(&gpio),
            config.pins.boiler,
            config.boiler_pwm_hz,
        ))
        .context("boiler not ready")?;
        let pump = PumpDriver::open(OutputLine::new(Arc::clone(&gpio), config.pins.pump))
            .context("pump not ready")?;
        let ranger = Arc::new(
            Ranger::open(Arc::clone(&gpio), RangerConfig::from_system(&config))
                .context("ranger not ready")?,
        );
        let regulator = Arc::new(
            Regulator::open(
                temperature.clone(),
                Box::new(boiler),
                RegulatorConfig::from_system(&config),
            )
            .context("regulator not ready")?,
        );
        let flow = Arc::new(
            FlowMeter::open(Arc::clone(&gpio), FlowConfig::from_system(&config))
                .context("flow meter not ready")?,
        );

        let components = Components {
            temperature,
            flow,
            ranger,
            heater: regulator,
            pump: Box::new(pump),
        };
        Self::assemble(config, components, clock, sink).context("brew controller not ready")
    }

    /// Start the control loop over already-opened components.
    pub fn assemble(
        config: SystemConfig,
        parts: Components,
        clock: Arc<dyn Clock>,
        mut sink: Box<dyn EventSink>,
    ) -> Result<Self> {
        let mut service = BrewService::new(config.clone(), parts.pump, clock);
        let request = service.start(&mut *sink);
        request.apply(parts.heater.as_ref());

        let shared = Arc::new(Shared {
            service: Mutex::new(service),
            sink: Mutex::new(sink),
            sequencer: Mutex::new(()),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let temperature = Arc::clone(&parts.temperature);
            let flow = Arc::clone(&parts.flow);
            let ranger = Arc::clone(&parts.ranger);
            let heater = Arc::clone(&parts.heater);
            let period = period_ms(config.control_tick_ms);
            Worker::spawn("brew-controller", move |run| {
                let mut next = Instant::now();
                while run.is_running() {
                    next += period;
                    let snapshot = read_sensors(
                        temperature.as_ref(),
                        flow.as_ref(),
                        ranger.as_ref(),
                        heater.as_ref(),
                    );
                    shared.run(heater.as_ref(), |svc, sink| svc.tick(snapshot, sink));
                    sleep_until(next);
                }
            })?
        };

        info!("Brew controller ready");
        Ok(Self {
            worker,
            flow: parts.flow,
            heater: parts.heater,
            ranger: parts.ranger,
            shared,
            temperature: parts.temperature,
            config,
        })
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn handle_command(&self, cmd: BrewCommand) {
        self.shared
            .run(self.heater.as_ref(), |svc, sink| svc.handle_command(cmd, sink));
    }

    pub fn power(&self, on: bool) {
        self.handle_command(BrewCommand::Power(on));
    }

    pub fn extract_one_cup(&self) {
        self.handle_command(BrewCommand::Extract(CupSize::One));
    }

    pub fn extract_two_cups(&self) {
        self.handle_command(BrewCommand::Extract(CupSize::Two));
    }

    pub fn set_steam_mode(&self, on: bool) {
        self.handle_command(BrewCommand::SetSteamMode(on));
    }

    // ── Queries ───────────────────────────────────────────────

    /// The control loop is running.
    pub fn is_ready(&self) -> bool {
        self.worker.is_running()
    }

    pub fn state(&self) -> BrewState {
        lock(&self.shared.service).state()
    }

    pub fn previous_state(&self) -> BrewState {
        lock(&self.shared.service).previous_state()
    }

    pub fn power_enabled(&self) -> bool {
        lock(&self.shared.service).power_enabled()
    }

    pub fn steam_mode(&self) -> bool {
        lock(&self.shared.service).steam_mode()
    }

    pub fn pump_on(&self) -> bool {
        lock(&self.shared.service).pump_on()
    }

    pub fn boiler_temperature(&self) -> TemperatureSample {
        self.temperature.temperature()
    }

    pub fn boiler_target_temperature(&self) -> f64 {
        self.heater.target()
    }

    pub fn flow(&self) -> FlowSample {
        self.flow.flow()
    }

    /// Tank fill fraction 0.0–1.0; empty when the ranger has no reading.
    pub fn water_tank_level(&self) -> f64 {
        tank_level(
            self.ranger.range(),
            self.config.tank_empty_m,
            self.config.tank_full_m,
        )
    }

    pub fn system_time(&self) -> Duration {
        lock(&self.shared.service).system_time()
    }

    pub fn idle_time(&self) -> Duration {
        lock(&self.shared.service).idle_time()
    }

    pub fn heating_rest_time(&self) -> Duration {
        lock(&self.shared.service).heating_rest_time()
    }

    pub fn extraction_time(&self) -> Duration {
        lock(&self.shared.service).extraction_time()
    }

    /// Offset-corrected volume of the current extraction (mL).
    pub fn extraction_volume(&self) -> f64 {
        lock(&self.shared.service).extraction_volume()
    }

    /// Current values as a log record.
    pub fn snapshot(&self) -> TelemetryRecord {
        lock(&self.shared.service).telemetry()
    }
}

fn read_sensors(
    temperature: &dyn TemperatureProbe,
    flow: &dyn FlowProbe,
    ranger: &dyn RangeProbe,
    heater: &dyn HeaterControl,
) -> SensorSnapshot {
    let t = temperature.temperature();
    let f = flow.flow();
    SensorSnapshot {
        temperature_c: t.celsius,
        target_c: heater.target(),
        flow_state: f.state,
        flow_volume_ml: f.millilitres,
        flow_speed_ml_s: f.ml_per_second,
        tank: ranger.range(),
        pump_on: false,
    }
}
