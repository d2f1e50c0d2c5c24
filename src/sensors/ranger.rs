//! HC-SR04 ultrasonic ranger measuring the water tank level.
//!
//! A measurement is a 10 µs trigger pulse followed by an echo whose
//! high time is the round-trip flight time.  The edge callback stores
//! the first two edge timestamps; the worker polls for them with a
//! bounded timeout, rejects outliers and smooths the result.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::app::ports::{EdgeHandler, EdgeMode, GpioPort, Level, RangeProbe};
use crate::config::SystemConfig;
use crate::drivers::worker::{Worker, period_ms, sleep_until};
use crate::error::Result;
use crate::sync::lock;

/// Poll granularity while waiting for the echo.
const ECHO_POLL: Duration = Duration::from_millis(1);

/// Smoothed distance to the water surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeSample {
    pub metres: f64,
    pub valid: bool,
}

/// Tank fill fraction from a range reading.  0 (empty) when invalid.
pub fn tank_level(range: RangeSample, empty_m: f64, full_m: f64) -> f64 {
    if !range.valid || empty_m <= full_m {
        return 0.0;
    }
    (1.0 - (range.metres - full_m) / (empty_m - full_m)).clamp(0.0, 1.0)
}

/// Echo width (µs) to one-way distance (m).
/// Kept fractional; sub-millimetre precision is not truncated away.
pub fn echo_to_metres(echo_us: u32, speed_of_sound_mm_per_s: f64) -> f64 {
    let round_trip_mm = f64::from(echo_us) * speed_of_sound_mm_per_s / 1_000_000.0;
    round_trip_mm / 2.0 / 1000.0
}

#[derive(Debug, Clone, Copy)]
pub struct RangerConfig {
    pub trigger_pin: u8,
    pub echo_pin: u8,
    pub trigger_us: u32,
    pub spacing: Duration,
    pub timeout: Duration,
    pub speed_of_sound_mm_per_s: f64,
    pub smoothing: f64,
    pub outlier_m: f64,
    pub min_valid_m: f64,
    pub startup_attempts: u32,
}

impl RangerConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            trigger_pin: config.pins.ranger_trigger,
            echo_pin: config.pins.ranger_echo,
            trigger_us: config.ranger_trigger_us,
            spacing: period_ms(config.ranger_spacing_ms),
            timeout: period_ms(config.ranger_timeout_ms),
            speed_of_sound_mm_per_s: config.speed_of_sound_mm_per_s,
            smoothing: config.ranger_smoothing,
            outlier_m: config.ranger_outlier_m,
            min_valid_m: config.ranger_min_valid_m,
            startup_attempts: config.ranger_startup_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Outlier rejection and smoothing (pure)
// ---------------------------------------------------------------------------

/// Exponential smoother with single-retry outlier rejection.
#[derive(Debug, Clone)]
pub struct RangeFilter {
    smoothing: f64,
    outlier_m: f64,
    min_valid_m: f64,
    last_raw: Option<f64>,
    filtered: f64,
}

impl RangeFilter {
    pub fn new(smoothing: f64, outlier_m: f64, min_valid_m: f64) -> Self {
        Self {
            smoothing,
            outlier_m,
            min_valid_m,
            last_raw: None,
            filtered: 0.0,
        }
    }

    /// A reading that jumped too far from the previous raw one, or is
    /// implausibly short, gets measured again.
    pub fn is_suspect(&self, raw: f64) -> bool {
        let jumped = self
            .last_raw
            .is_some_and(|last| (raw - last).abs() > self.outlier_m);
        jumped || raw < self.min_valid_m
    }

    /// Fold `raw` into the smoothed value.
    pub fn update(&mut self, raw: f64) -> f64 {
        if self.last_raw.is_none() {
            self.filtered = raw;
        } else {
            self.filtered += self.smoothing * (raw - self.filtered);
        }
        self.last_raw = Some(raw);
        self.filtered
    }

    /// Take a measurement, re-measuring once if it looks like an outlier.
    pub fn next(&mut self, mut measure: impl FnMut() -> f64) -> f64 {
        let mut raw = measure();
        if self.is_suspect(raw) {
            debug!("ranger: suspect reading {:.3} m, re-measuring", raw);
            raw = measure();
        }
        self.update(raw)
    }

    pub fn filtered(&self) -> f64 {
        self.filtered
    }
}

// ---------------------------------------------------------------------------
// Echo capture
// ---------------------------------------------------------------------------

struct EchoListener {
    stamps: Mutex<heapless::Vec<u32, 2>>,
}

impl EdgeHandler for EchoListener {
    fn on_edge(&self, _level: Level, tick_us: u32) {
        // Edges after the first two belong to nothing we asked for.
        let _ = lock(&self.stamps).push(tick_us);
    }
}

struct Trigger {
    gpio: Arc<dyn GpioPort>,
    config: RangerConfig,
    last_trigger: Option<Instant>,
}

impl Trigger {
    /// One raw measurement in metres; 0.0 on timeout.
    fn measure(&mut self, echo: &EchoListener) -> f64 {
        if let Some(last) = self.last_trigger {
            sleep_until(last + self.config.spacing);
        }

        lock(&echo.stamps).clear();
        self.last_trigger = Some(Instant::now());
        if let Err(e) = self
            .gpio
            .pulse(self.config.trigger_pin, Level::High, self.config.trigger_us)
        {
            warn!("ranger: trigger pulse failed: {}", e);
            return 0.0;
        }

        let deadline = Instant::now() + self.config.timeout;
        loop {
            {
                let stamps = lock(&echo.stamps);
                if stamps.len() == 2 {
                    let width = stamps[1].wrapping_sub(stamps[0]);
                    return echo_to_metres(width, self.config.speed_of_sound_mm_per_s);
                }
            }
            if Instant::now() >= deadline {
                debug!("ranger: echo timeout");
                return 0.0;
            }
            std::thread::sleep(ECHO_POLL);
        }
    }
}

// ---------------------------------------------------------------------------
// Ranger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Published {
    sample: RangeSample,
    measurements: u64,
}

/// Threaded tank ranger.  Stops its worker and unsubscribes on drop.
pub struct Ranger {
    worker: Worker,
    gpio: Arc<dyn GpioPort>,
    echo_pin: u8,
    published: Arc<Mutex<Published>>,
}

impl Ranger {
    /// Start measuring.  Waits briefly for a first reading but never
    /// fails on a silent sensor; the range is simply reported invalid.
    pub fn open(gpio: Arc<dyn GpioPort>, config: RangerConfig) -> Result<Self> {
        gpio.set_level(config.trigger_pin, Level::Low)?;

        let echo = Arc::new(EchoListener {
            stamps: Mutex::new(heapless::Vec::new()),
        });
        gpio.subscribe(config.echo_pin, EdgeMode::Either, echo.clone())?;

        let published = Arc::new(Mutex::new(Published::default()));
        let out = Arc::clone(&published);
        let mut trigger = Trigger {
            gpio: Arc::clone(&gpio),
            config,
            last_trigger: None,
        };
        let worker = Worker::spawn("ranger", move |run| {
            let mut filter = RangeFilter::new(config.smoothing, config.outlier_m, config.min_valid_m);
            while run.is_running() {
                let metres = filter.next(|| trigger.measure(&echo));
                let mut p = lock(&out);
                p.sample = RangeSample {
                    metres,
                    valid: metres > 0.0,
                };
                p.measurements += 1;
            }
        });
        let worker = match worker {
            Ok(w) => w,
            Err(e) => {
                gpio.unsubscribe(config.echo_pin);
                return Err(e);
            }
        };

        let ranger = Self {
            worker,
            gpio,
            echo_pin: config.echo_pin,
            published,
        };

        for _ in 0..config.startup_attempts {
            if lock(&ranger.published).measurements > 0 {
                break;
            }
            std::thread::sleep(config.spacing);
        }
        let first = ranger.range();
        if first.valid {
            info!("Ranger ready: {:.3} m", first.metres);
        } else {
            warn!("Ranger started without a valid echo");
        }
        Ok(ranger)
    }

    /// Smoothed distance; valid when positive.
    pub fn range(&self) -> RangeSample {
        lock(&self.published).sample
    }
}

impl RangeProbe for Ranger {
    fn range(&self) -> RangeSample {
        Ranger::range(self)
    }
}

impl Drop for Ranger {
    fn drop(&mut self) {
        self.worker.stop();
        self.gpio.unsubscribe(self.echo_pin);
    }
}
