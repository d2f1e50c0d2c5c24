//! Boiler temperature regulator.
//!
//! A fixed-period loop on its own thread reads the temperature probe,
//! runs the PID and writes the result to the boiler.  The schedule is
//! absolute: each iteration advances its deadline by one period before
//! sleeping, so loop overhead does not accumulate into drift.
//!
//! Gains, target and power are set from the brew core through
//! [`HeaterControl`]; they live under the same lock as the PID state so
//! an update never lands halfway through a computation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::app::ports::{HeaterControl, PowerOutput, TemperatureProbe};
use crate::config::{PidGains, SystemConfig};
use crate::control::pid::PidController;
use crate::drivers::worker::{Worker, period_ms, sleep_until};
use crate::error::Result;
use crate::sensors::tsic::TemperatureSample;
use crate::sync::lock;

/// Readings at or below this are a sensor fault, not a cold boiler.
pub const MIN_PLAUSIBLE_C: f64 = 0.5;

/// One gain/target profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulatorSettings {
    pub gains: PidGains,
    pub target_c: f64,
}

impl RegulatorSettings {
    pub fn brew(config: &SystemConfig) -> Self {
        Self {
            gains: config.brew_gains,
            target_c: config.brew_target_c,
        }
    }

    pub fn preheat(config: &SystemConfig) -> Self {
        Self {
            gains: config.brew_gains,
            target_c: config.preheat_target_c,
        }
    }

    pub fn steam(config: &SystemConfig) -> Self {
        Self {
            gains: config.steam_gains,
            target_c: config.steam_target_c,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegulatorConfig {
    pub period: Duration,
    pub integral_min: f64,
    pub integral_max: f64,
    pub initial: RegulatorSettings,
    pub powered: bool,
}

impl RegulatorConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            period: period_ms(config.regulator_period_ms),
            integral_min: config.integral_min,
            integral_max: config.integral_max,
            initial: RegulatorSettings::brew(config),
            powered: config.heating_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Loop state (pure)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RegulatorCore {
    pid: PidController,
    target_c: f64,
    power: bool,
    output: f64,
}

impl RegulatorCore {
    pub fn new(config: &RegulatorConfig) -> Self {
        Self {
            pid: PidController::new(
                config.initial.gains,
                config.integral_min,
                config.integral_max,
            ),
            target_c: config.initial.target_c,
            power: config.powered,
            output: 0.0,
        }
    }

    /// Output for one period given the latest reading.
    pub fn update(&mut self, sample: TemperatureSample) -> f64 {
        self.output = if !self.power || !sample.valid || sample.celsius <= MIN_PLAUSIBLE_C {
            0.0
        } else {
            self.pid.compute(self.target_c, sample.celsius)
        };
        self.output
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn integral(&self) -> f64 {
        self.pid.integral()
    }
}

// ---------------------------------------------------------------------------
// Regulator
// ---------------------------------------------------------------------------

/// Threaded regulator.  The boiler is moved into the loop and written
/// nowhere else; it is forced to 0 when the loop exits.
pub struct Regulator {
    worker: Worker,
    core: Arc<Mutex<RegulatorCore>>,
}

impl Regulator {
    pub fn open(
        probe: Arc<dyn TemperatureProbe>,
        mut boiler: Box<dyn PowerOutput>,
        config: RegulatorConfig,
    ) -> Result<Self> {
        boiler.set_power(0.0)?;

        let core = Arc::new(Mutex::new(RegulatorCore::new(&config)));
        let shared = Arc::clone(&core);
        let worker = Worker::spawn("regulator", move |run| {
            let mut next = Instant::now();
            while run.is_running() {
                next += config.period;
                let sample = probe.temperature();
                let power = lock(&shared).update(sample);
                if let Err(e) = boiler.set_power(power) {
                    error!("Regulator: boiler write failed: {}", e);
                }
                sleep_until(next);
            }
            if let Err(e) = boiler.set_power(0.0) {
                warn!("Regulator: failed to switch boiler off: {}", e);
            }
        })?;

        info!(
            "Regulator ready: target {:.1} °C, power {}",
            config.initial.target_c,
            if config.powered { "on" } else { "off" }
        );
        Ok(Self { worker, core })
    }

    /// Boiler power written by the last iteration.
    pub fn output(&self) -> f64 {
        lock(&self.core).output()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

impl HeaterControl for Regulator {
    fn set_gains(&self, gains: PidGains) {
        lock(&self.core).pid.set_gains(gains);
    }

    fn set_target(&self, celsius: f64) {
        lock(&self.core).target_c = celsius;
    }

    fn target(&self) -> f64 {
        lock(&self.core).target_c
    }

    fn set_power(&self, on: bool) {
        let mut core = lock(&self.core);
        if core.power != on {
            info!("Boiler regulation {}", if on { "enabled" } else { "disabled" });
        }
        core.power = on;
    }

    fn power(&self) -> bool {
        lock(&self.core).power
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpioError;

    struct FixedProbe(Mutex<TemperatureSample>);

    impl FixedProbe {
        fn new(celsius: f64, valid: bool) -> Arc<Self> {
            Arc::new(Self(Mutex::new(TemperatureSample { celsius, valid })))
        }
    }

    impl TemperatureProbe for FixedProbe {
        fn temperature(&self) -> TemperatureSample {
            *lock(&self.0)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingBoiler(Arc<Mutex<Vec<f64>>>);

    impl PowerOutput for RecordingBoiler {
        fn set_power(&mut self, fraction: f64) -> core::result::Result<(), GpioError> {
            lock(&self.0).push(fraction);
            Ok(())
        }
    }

    fn config(powered: bool) -> RegulatorConfig {
        RegulatorConfig {
            period: Duration::from_millis(10),
            powered,
            ..RegulatorConfig::from_system(&SystemConfig::default())
        }
    }

    #[test]
    fn core_forces_zero_when_unpowered_or_invalid() {
        let mut core = RegulatorCore::new(&config(false));
        assert_eq!(core.update(TemperatureSample { celsius: 20.0, valid: true }), 0.0);

        let mut core = RegulatorCore::new(&config(true));
        assert_eq!(core.update(TemperatureSample { celsius: 20.0, valid: false }), 0.0);
        assert_eq!(core.update(TemperatureSample { celsius: 0.5, valid: true }), 0.0);
        assert_eq!(core.integral(), 0.0);
        assert_eq!(core.update(TemperatureSample { celsius: 20.0, valid: true }), 1.0);
    }

    #[test]
    fn loop_writes_pid_output_and_zero_on_exit() {
        let boiler = RecordingBoiler::default();
        let writes = Arc::clone(&boiler.0);
        let reg = Regulator::open(FixedProbe::new(20.0, true), Box::new(boiler), config(true))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reg.output(), 1.0);
        drop(reg);

        let writes = lock(&writes).clone();
        assert_eq!(writes.first(), Some(&0.0));
        assert!(writes.contains(&1.0));
        assert_eq!(writes.last(), Some(&0.0));
    }

    #[test]
    fn power_off_drives_boiler_to_zero() {
        let boiler = RecordingBoiler::default();
        let writes = Arc::clone(&boiler.0);
        let reg = Regulator::open(FixedProbe::new(20.0, true), Box::new(boiler), config(true))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        reg.set_power(false);
        assert!(!reg.power());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(reg.output(), 0.0);
        assert_eq!(lock(&writes).last(), Some(&0.0));
    }

    #[test]
    fn apply_sets_gains_and_target() {
        let reg = Regulator::open(
            FixedProbe::new(90.0, true),
            Box::new(RecordingBoiler::default()),
            config(true),
        )
        .unwrap();
        reg.apply(RegulatorSettings::steam(&SystemConfig::default()));
        assert_eq!(reg.target(), 125.0);
        assert_eq!(lock(&reg.core).pid.gains(), SystemConfig::default().steam_gains);
    }
}
