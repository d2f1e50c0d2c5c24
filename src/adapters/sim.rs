//! In-memory edge source for host simulation and tests.
//!
//! [`SimGpio`] implements [`GpioPort`] without hardware: output writes
//! are recorded, injected edges are delivered synchronously to the
//! subscribed handler on the caller's thread, and trigger pulses can be
//! answered with a scripted echo so the ranger measures a chosen
//! distance.  The TSIC helpers synthesise the exact edge train a real
//! sensor would emit for a temperature.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::app::ports::{EdgeHandler, EdgeMode, GpioPort, Level};
use crate::error::GpioError;
use crate::sensors::tsic::{BIT_FRAME_US, parity8};
use crate::sync::lock;

/// Low-phase widths used when synthesising TSIC bits (µs).
const TSIC_ONE_LOW_US: u32 = 31;
const TSIC_ZERO_LOW_US: u32 = 94;

struct EchoScript {
    echo_pin: u8,
    /// Upcoming echo widths; `None` means "no echo" (timeout).
    queue: VecDeque<Option<u32>>,
    /// Used once the queue is empty.
    fallback: Option<u32>,
}

#[derive(Default)]
struct SimState {
    subscribers: HashMap<u8, (EdgeMode, Arc<dyn EdgeHandler>)>,
    levels: HashMap<u8, Level>,
    level_history: HashMap<u8, Vec<Level>>,
    pwm: HashMap<u8, (f64, u32)>,
    pulses: HashMap<u8, u32>,
    echoes: HashMap<u8, EchoScript>,
    broken_pins: HashSet<u8>,
}

/// Simulated GPIO daemon.
#[derive(Default)]
pub struct SimGpio {
    state: Mutex<SimState>,
    tick_us: AtomicU32,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fault injection ───────────────────────────────────────

    /// Make every capability call on `pin` fail with [`GpioError::BadPin`].
    pub fn break_pin(&self, pin: u8) {
        lock(&self.state).broken_pins.insert(pin);
    }

    // ── Edge injection ────────────────────────────────────────

    /// Deliver one edge on `pin` at `tick_us`.
    pub fn inject(&self, pin: u8, level: Level, tick_us: u32) {
        self.tick_us.store(tick_us, Ordering::Relaxed);
        let handler = {
            let state = lock(&self.state);
            state
                .subscribers
                .get(&pin)
                .filter(|(mode, _)| mode.accepts(level))
                .map(|(_, h)| Arc::clone(h))
        };
        if let Some(handler) = handler {
            handler.on_edge(level, tick_us);
        }
    }

    pub fn inject_all(&self, pin: u8, edges: &[(Level, u32)]) {
        for &(level, tick) in edges {
            self.inject(pin, level, tick);
        }
    }

    /// Emit `count` full pulses (rising then falling) on `pin`.
    pub fn pulse_train(&self, pin: u8, count: u32, spacing_us: u32) {
        for _ in 0..count {
            let t = self.advance(spacing_us / 2);
            self.inject(pin, Level::High, t);
            let t = self.advance(spacing_us - spacing_us / 2);
            self.inject(pin, Level::Low, t);
        }
    }

    /// Answer trigger pulses on `trigger` with an echo of `width_us` on `echo`.
    pub fn set_echo(&self, trigger: u8, echo: u8, width_us: Option<u32>) {
        lock(&self.state).echoes.insert(
            trigger,
            EchoScript {
                echo_pin: echo,
                queue: VecDeque::new(),
                fallback: width_us,
            },
        );
    }

    /// Queue one-shot echo widths consumed before the fallback.
    pub fn queue_echoes(&self, trigger: u8, widths: &[Option<u32>]) {
        if let Some(script) = lock(&self.state).echoes.get_mut(&trigger) {
            script.queue.extend(widths.iter().copied());
        }
    }

    /// Advance the free-running tick and return the new value.
    pub fn advance(&self, us: u32) -> u32 {
        self.tick_us.fetch_add(us, Ordering::Relaxed).wrapping_add(us)
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn level(&self, pin: u8) -> Option<Level> {
        lock(&self.state).levels.get(&pin).copied()
    }

    /// Every level written to `pin`, oldest first.
    pub fn level_history(&self, pin: u8) -> Vec<Level> {
        lock(&self.state)
            .level_history
            .get(&pin)
            .cloned()
            .unwrap_or_default()
    }

    /// Last PWM duty and frequency written to `pin`.
    pub fn pwm(&self, pin: u8) -> Option<(f64, u32)> {
        lock(&self.state).pwm.get(&pin).copied()
    }

    pub fn pulse_count(&self, pin: u8) -> u32 {
        lock(&self.state).pulses.get(&pin).copied().unwrap_or(0)
    }

    pub fn has_subscriber(&self, pin: u8) -> bool {
        lock(&self.state).subscribers.contains_key(&pin)
    }

    fn check(&self, state: &SimState, pin: u8) -> Result<(), GpioError> {
        if state.broken_pins.contains(&pin) {
            Err(GpioError::BadPin(pin))
        } else {
            Ok(())
        }
    }
}

impl GpioPort for SimGpio {
    fn set_level(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        self.check(&state, pin)?;
        state.levels.insert(pin, level);
        state.level_history.entry(pin).or_default().push(level);
        Ok(())
    }

    fn set_pwm(&self, pin: u8, duty: f64, frequency_hz: u32) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        self.check(&state, pin)?;
        state.pwm.insert(pin, (duty, frequency_hz));
        Ok(())
    }

    fn pulse(&self, pin: u8, level: Level, micros: u32) -> Result<(), GpioError> {
        let echo = {
            let mut state = lock(&self.state);
            self.check(&state, pin)?;
            *state.pulses.entry(pin).or_insert(0) += 1;
            state.levels.insert(pin, if level.is_high() { Level::Low } else { Level::High });
            state.echoes.get_mut(&pin).map(|script| {
                let width = script.queue.pop_front().unwrap_or(script.fallback);
                (script.echo_pin, width)
            })
        };

        self.advance(micros);
        if let Some((echo_pin, Some(width))) = echo {
            let start = self.advance(200);
            self.inject(echo_pin, Level::High, start);
            let end = self.advance(width);
            self.inject(echo_pin, Level::Low, end);
        }
        Ok(())
    }

    fn subscribe(
        &self,
        pin: u8,
        mode: EdgeMode,
        handler: Arc<dyn EdgeHandler>,
    ) -> Result<(), GpioError> {
        let mut state = lock(&self.state);
        self.check(&state, pin)?;
        state.subscribers.insert(pin, (mode, handler));
        Ok(())
    }

    fn unsubscribe(&self, pin: u8) {
        lock(&self.state).subscribers.remove(&pin);
    }
}

// ---------------------------------------------------------------------------
// TSIC 306 packet synthesis
// ---------------------------------------------------------------------------

/// Raw 11-bit reading for `celsius` on a sensor spanning `min_c..=max_c`.
pub fn tsic_raw(celsius: f64, min_c: f64, max_c: f64) -> u32 {
    let scaled = (celsius - min_c) / (max_c - min_c) * 2047.0;
    scaled.round().clamp(0.0, 2047.0) as u32
}

/// 20-bit packet word for `raw`, start bits encoded as 0.
pub fn tsic_word(raw: u32) -> u32 {
    let high = (raw >> 8) & 0x7;
    let low = raw & 0xFF;
    let high9 = (high << 1) | parity8(high);
    let low9 = (low << 1) | parity8(low);
    (high9 << 10) | low9
}

/// Edge train for one packet starting at `start_tick`, MSB first.
pub fn tsic_packet_edges(celsius: f64, min_c: f64, max_c: f64, start_tick: u32) -> Vec<(Level, u32)> {
    let word = tsic_word(tsic_raw(celsius, min_c, max_c));
    let mut edges = Vec::with_capacity(40);
    for (n, shift) in (0..20u32).rev().enumerate() {
        let bit = (word >> shift) & 1;
        let fall = start_tick.wrapping_add(n as u32 * BIT_FRAME_US);
        let low = if bit == 1 { TSIC_ONE_LOW_US } else { TSIC_ZERO_LOW_US };
        edges.push((Level::Low, fall));
        edges.push((Level::High, fall.wrapping_add(low)));
    }
    edges
}
