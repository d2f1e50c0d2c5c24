//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   GpioPort ──▶ sensors / drivers ──▶ probe ports ──▶ BrewService (domain)
//! ```
//!
//! The edge source (GPIO daemon) implements [`GpioPort`]; every sensor
//! and actuator in this crate depends only on that capability.  The
//! brew core in turn consumes the sensors through the narrow probe
//! ports below, so it can be driven entirely by mocks in tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PidGains;
use crate::control::regulator::RegulatorSettings;
use crate::error::GpioError;
use crate::sensors::flow::FlowSample;
use crate::sensors::ranger::RangeSample;
use crate::sensors::tsic::TemperatureSample;

// ───────────────────────────────────────────────────────────────
// Edge source (driven adapter: GPIO daemon ↔ components)
// ───────────────────────────────────────────────────────────────

/// Logic level of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Self::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Self::High } else { Self::Low }
    }
}

/// Which transitions an edge subscription reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    Rising,
    Falling,
    Either,
}

impl EdgeMode {
    /// Whether an edge that ended at `level` is reported under this mode.
    pub fn accepts(self, level: Level) -> bool {
        match self {
            Self::Rising => level == Level::High,
            Self::Falling => level == Level::Low,
            Self::Either => true,
        }
    }
}

/// Typed edge listener.
///
/// `tick_us` is the edge source's free-running microsecond counter; it
/// wraps at `u32::MAX`, so consumers subtract with `wrapping_sub`.
/// Called on the edge source's delivery thread and must not block.
pub trait EdgeHandler: Send + Sync {
    fn on_edge(&self, level: Level, tick_us: u32);
}

/// The GPIO capabilities consumed by this crate.
pub trait GpioPort: Send + Sync {
    /// Drive `pin` as an output at `level`.
    fn set_level(&self, pin: u8, level: Level) -> Result<(), GpioError>;

    /// Drive `pin` with PWM at `duty` (0.0–1.0) and `frequency_hz`.
    fn set_pwm(&self, pin: u8, duty: f64, frequency_hz: u32) -> Result<(), GpioError>;

    /// Hold `pin` at `level` for `micros`, then return it to the opposite level.
    fn pulse(&self, pin: u8, level: Level, micros: u32) -> Result<(), GpioError>;

    /// Register `handler` for edges on `pin`.  Replaces any previous handler.
    fn subscribe(
        &self,
        pin: u8,
        mode: EdgeMode,
        handler: Arc<dyn EdgeHandler>,
    ) -> Result<(), GpioError>;

    /// Drop the handler registered for `pin`, if any.
    fn unsubscribe(&self, pin: u8);
}

// ───────────────────────────────────────────────────────────────
// Time
// ───────────────────────────────────────────────────────────────

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin.  Never goes backwards.
    fn now(&self) -> Duration;
}

// ───────────────────────────────────────────────────────────────
// Sensor ports (components → domain)
// ───────────────────────────────────────────────────────────────

/// Boiler temperature.
pub trait TemperatureProbe: Send + Sync {
    fn temperature(&self) -> TemperatureSample;
}

/// Flow meter episode state, volume and rate.
pub trait FlowProbe: Send + Sync {
    fn flow(&self) -> FlowSample;
}

/// Water tank distance sensor.
pub trait RangeProbe: Send + Sync {
    fn range(&self) -> RangeSample;
}

// ───────────────────────────────────────────────────────────────
// Actuator ports (domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Boiler temperature regulator as seen by the brew core.
pub trait HeaterControl: Send + Sync {
    fn set_gains(&self, gains: PidGains);
    fn set_target(&self, celsius: f64);
    fn target(&self) -> f64;
    fn set_power(&self, on: bool);
    fn power(&self) -> bool;

    /// Apply a complete gain/target profile.
    fn apply(&self, settings: RegulatorSettings) {
        self.set_gains(settings.gains);
        self.set_target(settings.target_c);
    }
}

/// Pump relay.  Exclusively written by the brew core.
pub trait PumpPort: Send {
    fn set_power(&mut self, on: bool) -> Result<(), GpioError>;
    fn power(&self) -> bool;
}

/// Proportional power output (the boiler).  Exclusively written by the regulator.
pub trait PowerOutput: Send {
    /// `fraction` is clamped to 0.0–1.0 by the implementation.
    fn set_power(&mut self, fraction: f64) -> Result<(), GpioError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (console log,
/// shot files, UI).
pub trait EventSink: Send {
    fn emit(&mut self, event: &super::events::AppEvent);
}
