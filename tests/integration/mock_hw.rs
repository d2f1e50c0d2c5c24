//! Simulated machine for controller integration tests.
//!
//! Wraps a [`SimGpio`] with the signals a running machine produces: a
//! TSIC packet stream on the thermometer pin, an echo on the ranger and
//! flow-meter pulses on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gaggia::adapters::sim::{SimGpio, tsic_packet_edges};
use gaggia::app::events::AppEvent;
use gaggia::app::ports::EventSink;
use gaggia::config::SystemConfig;
use gaggia::fsm::BrewState;

/// Echo width for a 6.9 cm reading, half way between full and empty.
pub const HALF_TANK_ECHO_US: u32 = 406;

/// Defaults with every wait shortened to test scale.
pub fn fast_config() -> SystemConfig {
    SystemConfig {
        preheat_duration_secs: 0.2,
        regulator_period_ms: 10,
        tsic_startup_attempts: 50,
        tsic_startup_interval_ms: 5,
        ranger_spacing_ms: 5,
        ranger_timeout_ms: 5,
        flow_idle_timeout_ms: 100,
        manual_debounce_secs: 0.5,
        min_shot_secs: 0.05,
        ..SystemConfig::default()
    }
}

// ── TSIC packet stream ────────────────────────────────────────

/// Background thread sending one TSIC packet every few milliseconds.
pub struct TsicFeeder {
    running: Arc<AtomicBool>,
    celsius: Arc<Mutex<f64>>,
    handle: Option<JoinHandle<()>>,
}

#[allow(dead_code)]
impl TsicFeeder {
    pub fn start(gpio: Arc<SimGpio>, config: &SystemConfig, celsius: f64) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let celsius = Arc::new(Mutex::new(celsius));
        let (pin, min_c, max_c) = (config.pins.tsic, config.tsic_min_c, config.tsic_max_c);

        let handle = {
            let running = Arc::clone(&running);
            let celsius = Arc::clone(&celsius);
            std::thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let c = *celsius.lock().unwrap();
                    // Idle gap well beyond two bit frames before each packet.
                    let start = gpio.advance(10_000);
                    gpio.inject_all(pin, &tsic_packet_edges(c, min_c, max_c, start));
                    gpio.advance(20 * 125);
                    std::thread::sleep(Duration::from_millis(2));
                }
            })
        };

        Self {
            running,
            celsius,
            handle: Some(handle),
        }
    }

    pub fn set(&self, celsius: f64) {
        *self.celsius.lock().unwrap() = celsius;
    }
}

impl Drop for TsicFeeder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

// ── Event capture ─────────────────────────────────────────────

/// Event sink whose history stays readable after the controller owns it.
#[derive(Clone, Default)]
pub struct RecordingSink(pub Arc<Mutex<Vec<AppEvent>>>);

#[allow(dead_code)]
impl RecordingSink {
    pub fn events(&self) -> Vec<AppEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn saw_transition(&self, from: BrewState, to: BrewState) -> bool {
        self.events()
            .iter()
            .any(|e| *e == AppEvent::StateChanged { from, to })
    }

    pub fn shots_completed(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, AppEvent::ShotCompleted(_)))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Gpio with the ranger answering at half tank.
pub fn machine_gpio(config: &SystemConfig) -> Arc<SimGpio> {
    let gpio = Arc::new(SimGpio::new());
    gpio.set_echo(
        config.pins.ranger_trigger,
        config.pins.ranger_echo,
        Some(HALF_TANK_ECHO_US),
    );
    gpio
}
