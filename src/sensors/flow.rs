//! Hall-effect flow meter driver.
//!
//! The meter toggles its output as water passes; every edge (rising and
//! falling) is one count of ~0.229 mL.  The edge callback only bumps a
//! counter.  A worker ticking every 25 ms turns the counter into a
//! Flowing/Stopped episode state, a per-episode volume and a rate:
//!
//! - count changed while Stopped → Flowing, counter zeroed
//! - count unchanged for the idle timeout while Flowing → Stopped, counter zeroed
//! - every speed window (500 ms) the count delta becomes the rate
//!
//! Volume therefore always measures the current (or last) episode only.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info};

use crate::app::ports::{EdgeHandler, EdgeMode, FlowProbe, GpioPort, Level};
use crate::config::SystemConfig;
use crate::drivers::worker::{Worker, period_ms, sleep_until};
use crate::error::Result;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowState {
    Flowing,
    #[default]
    Stopped,
}

impl FlowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flowing => "Flowing",
            Self::Stopped => "Stopped",
        }
    }
}

/// Consistent view of the meter at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowSample {
    pub state: FlowState,
    /// Counts since the current episode began.
    pub pulse_count: u32,
    /// `pulse_count` × calibration.
    pub millilitres: f64,
    /// Count rate over the last speed window.
    pub pulses_per_second: f64,
    /// `pulses_per_second` × calibration.
    pub ml_per_second: f64,
}

/// Timing and calibration for one meter.
#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    pub pin: u8,
    pub ml_per_pulse: f64,
    pub sample_ms: u32,
    pub speed_window_ms: u32,
    pub idle_timeout_ms: u32,
}

impl FlowConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            pin: config.pins.flow,
            ml_per_pulse: config.flow_ml_per_pulse,
            sample_ms: config.flow_sample_ms,
            speed_window_ms: config.flow_speed_window_ms,
            idle_timeout_ms: config.flow_idle_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Episode tracking (pure)
// ---------------------------------------------------------------------------

/// Counter plus the per-tick episode logic, kept under one lock so a
/// reader never sees a new state with an old count.
#[derive(Debug)]
pub struct FlowTracker {
    config: FlowConfig,
    pulses: u32,
    state: FlowState,
    previous_count: u32,
    window_start_count: u32,
    window_ms: u32,
    idle_ms: u32,
    pulses_per_second: f64,
}

impl FlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            pulses: 0,
            state: FlowState::Stopped,
            previous_count: 0,
            window_start_count: 0,
            window_ms: 0,
            idle_ms: 0,
            pulses_per_second: 0.0,
        }
    }

    /// One meter edge.
    pub fn count_edge(&mut self) {
        self.pulses = self.pulses.wrapping_add(1);
    }

    /// Advance by `elapsed_ms`.  Returns the new state on a transition.
    pub fn tick(&mut self, elapsed_ms: u32) -> Option<FlowState> {
        let count = self.pulses;

        self.window_ms += elapsed_ms;
        if self.window_ms >= self.config.speed_window_ms {
            let delta = count.wrapping_sub(self.window_start_count);
            self.pulses_per_second = f64::from(delta) * 1000.0 / f64::from(self.window_ms);
            self.window_start_count = count;
            self.window_ms = 0;
        }

        let mut transition = None;
        if count == self.previous_count {
            self.idle_ms = self.idle_ms.saturating_add(elapsed_ms);
            if self.state == FlowState::Flowing && self.idle_ms >= self.config.idle_timeout_ms {
                self.start_episode(FlowState::Stopped);
                transition = Some(FlowState::Stopped);
            }
        } else {
            self.idle_ms = 0;
            if self.state == FlowState::Stopped {
                self.start_episode(FlowState::Flowing);
                transition = Some(FlowState::Flowing);
            }
        }

        self.previous_count = self.pulses;
        transition
    }

    fn start_episode(&mut self, state: FlowState) {
        self.state = state;
        self.pulses = 0;
        self.window_start_count = 0;
        self.window_ms = 0;
        self.pulses_per_second = 0.0;
    }

    pub fn sample(&self) -> FlowSample {
        FlowSample {
            state: self.state,
            pulse_count: self.pulses,
            millilitres: f64::from(self.pulses) * self.config.ml_per_pulse,
            pulses_per_second: self.pulses_per_second,
            ml_per_second: self.pulses_per_second * self.config.ml_per_pulse,
        }
    }
}

struct FlowListener {
    tracker: Mutex<FlowTracker>,
}

impl EdgeHandler for FlowListener {
    fn on_edge(&self, _level: Level, _tick_us: u32) {
        lock(&self.tracker).count_edge();
    }
}

// ---------------------------------------------------------------------------
// FlowMeter
// ---------------------------------------------------------------------------

/// Threaded flow meter.  Stops its worker and unsubscribes on drop.
pub struct FlowMeter {
    worker: Worker,
    gpio: Arc<dyn GpioPort>,
    pin: u8,
    listener: Arc<FlowListener>,
}

impl FlowMeter {
    pub fn open(gpio: Arc<dyn GpioPort>, config: FlowConfig) -> Result<Self> {
        let listener = Arc::new(FlowListener {
            tracker: Mutex::new(FlowTracker::new(config)),
        });
        gpio.subscribe(config.pin, EdgeMode::Either, listener.clone())?;

        let shared = Arc::clone(&listener);
        let worker = Worker::spawn("flow-meter", move |run| {
            let period = period_ms(config.sample_ms);
            let mut next = Instant::now();
            while run.is_running() {
                next += period;
                let (transition, sample) = {
                    let mut tracker = lock(&shared.tracker);
                    (tracker.tick(config.sample_ms), tracker.sample())
                };
                match transition {
                    Some(FlowState::Flowing) => info!("Flow started"),
                    Some(FlowState::Stopped) => info!("Flow stopped"),
                    None => {}
                }
                if transition.is_none() && sample.state == FlowState::Flowing {
                    debug!(
                        "flow {:.1} mL at {:.2} mL/s",
                        sample.millilitres, sample.ml_per_second
                    );
                }
                sleep_until(next);
            }
        });
        let worker = match worker {
            Ok(w) => w,
            Err(e) => {
                gpio.unsubscribe(config.pin);
                return Err(e);
            }
        };

        info!("Flow meter ready on GPIO {}", config.pin);
        Ok(Self {
            worker,
            gpio,
            pin: config.pin,
            listener,
        })
    }

    pub fn state(&self) -> FlowState {
        self.flow().state
    }

    /// Volume of the current episode (mL).
    pub fn volume_ml(&self) -> f64 {
        self.flow().millilitres
    }

    /// Flow rate (mL/s).
    pub fn speed(&self) -> f64 {
        self.flow().ml_per_second
    }

    /// Raw count rate (counts/s).
    pub fn pulse_rate(&self) -> f64 {
        self.flow().pulses_per_second
    }
}

impl FlowProbe for FlowMeter {
    fn flow(&self) -> FlowSample {
        lock(&self.listener.tracker).sample()
    }
}

impl Drop for FlowMeter {
    fn drop(&mut self) {
        self.worker.stop();
        self.gpio.unsubscribe(self.pin);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn volume_resets_on_transition_and_never_drops_within_episode(
            bursts in proptest::collection::vec(0u32..6, 1..300)
        ) {
            let mut t = FlowTracker::new(FlowConfig::from_system(&SystemConfig::default()));
            let mut last_ml = 0.0;
            for n in bursts {
                for _ in 0..n {
                    t.count_edge();
                }
                let transition = t.tick(25);
                let s = t.sample();
                if transition.is_some() {
                    prop_assert_eq!(s.millilitres, 0.0);
                } else {
                    prop_assert!(s.millilitres >= last_ml);
                }
                prop_assert!(s.pulses_per_second >= 0.0);
                last_ml = s.millilitres;
            }
        }
    }
}
