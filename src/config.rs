//! System configuration parameters
//!
//! All tunable parameters for the espresso controller core.
//! Values arrive already parsed (settings file, UI); this module only
//! defines their shape, defaults and sanity rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pins;

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl PidGains {
    pub const fn new(p: f64, i: f64, d: f64) -> Self {
        Self { p, i, d }
    }
}

/// GPIO wiring (BCM numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    pub tsic: u8,
    pub flow: u8,
    pub pump: u8,
    pub boiler: u8,
    pub ranger_trigger: u8,
    pub ranger_echo: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            tsic: pins::TSIC_GPIO,
            flow: pins::FLOW_GPIO,
            pump: pins::PUMP_GPIO,
            boiler: pins::BOILER_GPIO,
            ranger_trigger: pins::RANGER_TRIGGER_GPIO,
            ranger_echo: pins::RANGER_ECHO_GPIO,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub pins: PinMap,

    // --- Boiler regulation ---
    /// Gains used for preheating and brewing.
    pub brew_gains: PidGains,
    /// Gains used while steaming.
    pub steam_gains: PidGains,
    /// Brew temperature target (°C).
    pub brew_target_c: f64,
    /// Steam temperature target (°C).
    pub steam_target_c: f64,
    /// Target while the machine is still preheating (°C).
    pub preheat_target_c: f64,
    /// Time from power-up until Heating hands over to Active (seconds).
    pub preheat_duration_secs: f64,
    /// Anti-windup clamp for the integral accumulator.
    pub integral_min: f64,
    pub integral_max: f64,
    /// Regulator loop period (milliseconds).
    pub regulator_period_ms: u32,
    /// Boiler relay PWM frequency (Hz).
    pub boiler_pwm_hz: u32,
    /// Start with the boiler regulator powered.
    pub heating_enabled: bool,

    // --- Extraction ---
    pub one_cup_ml: f64,
    pub two_cups_ml: f64,
    /// Priming volume pumped before liquid reaches the group (mL).
    pub flow_offset_one_cup_ml: f64,
    pub flow_offset_two_cups_ml: f64,
    /// Idle time before flow is taken as a new manual shot (seconds).
    pub manual_debounce_secs: f64,
    /// Shots shorter than this are discarded as noise (seconds).
    pub min_shot_secs: f64,

    // --- Flow meter ---
    pub flow_ml_per_pulse: f64,
    pub flow_sample_ms: u32,
    pub flow_speed_window_ms: u32,
    pub flow_idle_timeout_ms: u32,

    // --- TSIC 306 ---
    pub tsic_min_c: f64,
    pub tsic_max_c: f64,
    pub tsic_startup_attempts: u32,
    pub tsic_startup_interval_ms: u32,

    // --- Ranger (water tank) ---
    pub ranger_spacing_ms: u32,
    pub ranger_timeout_ms: u32,
    pub ranger_trigger_us: u32,
    pub ranger_smoothing: f64,
    /// Raw jump between successive measurements that triggers a re-measure (m).
    pub ranger_outlier_m: f64,
    /// Raw readings below this are suspect (m).
    pub ranger_min_valid_m: f64,
    pub speed_of_sound_mm_per_s: f64,
    pub ranger_startup_attempts: u32,
    /// Distance reading with an empty tank (m).
    pub tank_empty_m: f64,
    /// Distance reading with a full tank (m).
    pub tank_full_m: f64,

    // --- Controller ---
    pub control_tick_ms: u32,
    pub system_log_interval_ms: u32,
    pub shot_log_interval_ms: u32,
    /// Emit telemetry and shot logs.
    pub logging: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::default(),

            // Boiler
            brew_gains: PidGains::new(0.07, 0.05, 0.90),
            steam_gains: PidGains::new(0.07, 0.05, 0.90),
            brew_target_c: 93.0,
            steam_target_c: 125.0,
            preheat_target_c: 100.0,
            preheat_duration_secs: 600.0,
            integral_min: 0.0,
            integral_max: 1.0,
            regulator_period_ms: 1000,
            boiler_pwm_hz: 10,
            heating_enabled: true,

            // Extraction
            one_cup_ml: 25.0,
            two_cups_ml: 50.0,
            flow_offset_one_cup_ml: 7.5,
            flow_offset_two_cups_ml: 15.0,
            manual_debounce_secs: 5.0,
            min_shot_secs: 5.0,

            // Flow meter
            flow_ml_per_pulse: 0.229_247_353,
            flow_sample_ms: 25,
            flow_speed_window_ms: 500,
            flow_idle_timeout_ms: 1000,

            // TSIC 306
            tsic_min_c: -50.0,
            tsic_max_c: 150.0,
            tsic_startup_attempts: 10,
            tsic_startup_interval_ms: 100,

            // Ranger
            ranger_spacing_ms: 100,
            ranger_timeout_ms: 60,
            ranger_trigger_us: 10,
            ranger_smoothing: 0.5,
            ranger_outlier_m: 0.01,
            ranger_min_valid_m: 0.001,
            speed_of_sound_mm_per_s: 340_270.0,
            ranger_startup_attempts: 3,
            tank_empty_m: 0.12,
            tank_full_m: 0.018,

            // Controller
            control_tick_ms: 25,
            system_log_interval_ms: 500,
            shot_log_interval_ms: 50,
            logging: true,
        }
    }
}

/// Longest wait any duration setting may ask for (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Seconds setting as a `Duration`, clamped to `0..=MAX_DURATION_SECS`.
/// NaN reads as zero.
fn clamped_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DURATION_SECS)).unwrap_or_default()
}

impl SystemConfig {
    pub fn preheat_duration(&self) -> Duration {
        clamped_secs(self.preheat_duration_secs)
    }

    pub fn manual_debounce(&self) -> Duration {
        clamped_secs(self.manual_debounce_secs)
    }

    /// Every floating-point setting, for the finiteness check.
    fn real_values(&self) -> [f64; 27] {
        [
            self.brew_gains.p,
            self.brew_gains.i,
            self.brew_gains.d,
            self.steam_gains.p,
            self.steam_gains.i,
            self.steam_gains.d,
            self.brew_target_c,
            self.steam_target_c,
            self.preheat_target_c,
            self.preheat_duration_secs,
            self.integral_min,
            self.integral_max,
            self.one_cup_ml,
            self.two_cups_ml,
            self.flow_offset_one_cup_ml,
            self.flow_offset_two_cups_ml,
            self.manual_debounce_secs,
            self.min_shot_secs,
            self.flow_ml_per_pulse,
            self.tsic_min_c,
            self.tsic_max_c,
            self.ranger_smoothing,
            self.ranger_outlier_m,
            self.ranger_min_valid_m,
            self.speed_of_sound_mm_per_s,
            self.tank_empty_m,
            self.tank_full_m,
        ]
    }

    /// Reject values that would make a loop spin, divide by zero or
    /// drive the boiler outside the sensor range.
    pub fn validate(&self) -> Result<()> {
        if self.real_values().iter().any(|v| !v.is_finite()) {
            return Err(Error::Config("settings must be finite numbers"));
        }
        for secs in [
            self.preheat_duration_secs,
            self.manual_debounce_secs,
            self.min_shot_secs,
        ] {
            if !(0.0..=MAX_DURATION_SECS).contains(&secs) {
                return Err(Error::Config("durations must be between zero and one day"));
            }
        }
        if self.control_tick_ms == 0
            || self.flow_sample_ms == 0
            || self.regulator_period_ms == 0
            || self.shot_log_interval_ms == 0
            || self.system_log_interval_ms == 0
        {
            return Err(Error::Config("loop periods must be non-zero"));
        }
        if self.flow_speed_window_ms < self.flow_sample_ms {
            return Err(Error::Config("flow speed window shorter than sample period"));
        }
        if self.boiler_pwm_hz == 0 {
            return Err(Error::Config("boiler PWM frequency must be non-zero"));
        }
        if self.tsic_min_c >= self.tsic_max_c {
            return Err(Error::Config("TSIC range is inverted"));
        }
        for target in [self.brew_target_c, self.steam_target_c, self.preheat_target_c] {
            if target < self.tsic_min_c || target > self.tsic_max_c {
                return Err(Error::Config("temperature target outside sensor range"));
            }
        }
        if self.integral_min > self.integral_max {
            return Err(Error::Config("integral clamp is inverted"));
        }
        if self.flow_offset_one_cup_ml < 0.0 || self.flow_offset_two_cups_ml < 0.0 {
            return Err(Error::Config("flow offsets must not be negative"));
        }
        if self.one_cup_ml <= 0.0 || self.two_cups_ml <= 0.0 || self.flow_ml_per_pulse <= 0.0 {
            return Err(Error::Config("extraction volumes must be positive"));
        }
        if !(0.0..=1.0).contains(&self.ranger_smoothing) || self.ranger_smoothing == 0.0 {
            return Err(Error::Config("ranger smoothing must be in (0, 1]"));
        }
        if self.tank_empty_m <= self.tank_full_m {
            return Err(Error::Config("tank empty distance must exceed full distance"));
        }
        if self.speed_of_sound_mm_per_s <= 0.0 {
            return Err(Error::Config("speed of sound must be positive"));
        }
        Ok(())
    }
}
