//! TSIC 306 boiler temperature sensor decoder.
//!
//! The sensor pushes a self-clocked packet every ~100 ms on a single
//! wire.  Each bit occupies a 125 µs frame that starts with a falling
//! edge; the length of the low phase encodes the bit:
//!
//! ```text
//!        ┌──┐   ┌────────┐      ┌──────┐
//!   ─────┘  └───┘        └──────┘      └─ ...
//!   low < 62.5 µs → 1    low < 125 µs → 0
//! ```
//!
//! Twenty rising edges make a packet: two 10-bit words, each a start
//! bit, 8 data bits (MSB first) and an even-parity bit.  The 11-bit raw
//! value maps linearly onto the sensor range (−50 … 150 °C).
//!
//! Decoding runs entirely inside the edge callback; the result is a
//! [`TemperatureSample`] behind its own lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};

use crate::app::ports::{EdgeHandler, EdgeMode, GpioPort, Level, TemperatureProbe};
use crate::error::{Result, SensorError};
use crate::sync::lock;

/// Duration of one bit (µs).
pub const BIT_FRAME_US: u32 = 125;

/// Rising edges per complete packet.
const EDGES_PER_PACKET: u8 = 20;

/// Largest 11-bit raw reading.
const RAW_MAX: u32 = 2047;

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// Latest decoded boiler temperature.
///
/// On a bad packet `valid` drops to `false` while `celsius` keeps the
/// last good value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TemperatureSample {
    pub celsius: f64,
    pub valid: bool,
}

/// Why a complete packet was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// A received parity bit disagrees with its data byte.
    Parity,
    /// The five unused high bits of the first data byte were set.
    Prefix,
    /// The decoded value lies outside the configured sensor range.
    OutOfRange,
}

// ---------------------------------------------------------------------------
// Pure decoding
// ---------------------------------------------------------------------------

/// Even parity of the low 8 bits of `v` (1 when an odd number of bits is set).
pub fn parity8(v: u32) -> u32 {
    let nibble = (v ^ (v >> 4)) & 0xF;
    (0x6996 >> nibble) & 1
}

/// Validate and convert a 20-bit packet into °C.
pub fn decode_packet(word: u32, min_c: f64, max_c: f64) -> core::result::Result<f64, PacketError> {
    let high = (word >> 10) & 0x1FF;
    let low = word & 0x1FF;

    let (high_data, high_parity) = (high >> 1, high & 1);
    let (low_data, low_parity) = (low >> 1, low & 1);

    if parity8(high_data) != high_parity || parity8(low_data) != low_parity {
        return Err(PacketError::Parity);
    }
    if high_data & 0xF8 != 0 {
        return Err(PacketError::Prefix);
    }

    let raw = (high_data << 8) | low_data;
    let celsius = min_c + (max_c - min_c) * f64::from(raw) / f64::from(RAW_MAX);
    if !(min_c..=max_c).contains(&celsius) {
        return Err(PacketError::OutOfRange);
    }
    Ok(celsius)
}

/// Edge-timing state machine that assembles 20-bit packets.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    last_low: u32,
    last_high: u32,
    edges: u8,
    word: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one edge.  Returns the packet word after the 20th bit.
    pub fn on_edge(&mut self, level: Level, tick_us: u32) -> Option<u32> {
        match level {
            Level::Low => {
                // Line held high longer than two frames: inter-packet gap or noise.
                if tick_us.wrapping_sub(self.last_high) > 2 * BIT_FRAME_US {
                    self.reset();
                }
                self.last_low = tick_us;
                None
            }
            Level::High => {
                self.last_high = tick_us;
                let low = tick_us.wrapping_sub(self.last_low);

                // Anything at or beyond one frame, including the band up to
                // two frames, is a corrupt bit.
                let bit = if low >= BIT_FRAME_US {
                    self.reset();
                    return None;
                } else if 2 * low < BIT_FRAME_US {
                    1
                } else {
                    0
                };

                self.word = (self.word << 1) | bit;
                self.edges += 1;
                if self.edges < EDGES_PER_PACKET {
                    return None;
                }

                let word = self.word & 0xF_FFFF;
                self.reset();
                Some(word)
            }
        }
    }

    /// Drop any partially received packet.
    pub fn reset(&mut self) {
        self.edges = 0;
        self.word = 0;
    }

    /// Bits received for the packet in progress.
    pub fn pending_bits(&self) -> u8 {
        self.edges
    }
}

// ---------------------------------------------------------------------------
// Edge listener
// ---------------------------------------------------------------------------

struct TsicListener {
    decoder: Mutex<FrameDecoder>,
    sample: Mutex<TemperatureSample>,
    min_c: f64,
    max_c: f64,
}

impl TsicListener {
    fn publish(&self, decoded: core::result::Result<f64, PacketError>) {
        let mut sample = lock(&self.sample);
        match decoded {
            Ok(celsius) => {
                *sample = TemperatureSample {
                    celsius,
                    valid: true,
                };
            }
            Err(e) => {
                sample.valid = false;
                debug!("TSIC packet rejected: {:?}", e);
            }
        }
    }
}

impl EdgeHandler for TsicListener {
    fn on_edge(&self, level: Level, tick_us: u32) {
        let packet = lock(&self.decoder).on_edge(level, tick_us);
        if let Some(word) = packet {
            self.publish(decode_packet(word, self.min_c, self.max_c));
        }
    }
}

// ---------------------------------------------------------------------------
// TemperatureDecoder
// ---------------------------------------------------------------------------

/// Startup parameters for [`TemperatureDecoder::open`].
#[derive(Debug, Clone, Copy)]
pub struct TsicConfig {
    pub pin: u8,
    pub min_c: f64,
    pub max_c: f64,
    pub startup_attempts: u32,
    pub startup_interval: Duration,
}

impl TsicConfig {
    pub fn from_system(config: &crate::config::SystemConfig) -> Self {
        Self {
            pin: config.pins.tsic,
            min_c: config.tsic_min_c,
            max_c: config.tsic_max_c,
            startup_attempts: config.tsic_startup_attempts,
            startup_interval: crate::drivers::worker::period_ms(config.tsic_startup_interval_ms),
        }
    }
}

/// Boiler thermometer.  Unsubscribes from its pin on drop.
pub struct TemperatureDecoder {
    gpio: Arc<dyn GpioPort>,
    pin: u8,
    listener: Arc<TsicListener>,
}

impl TemperatureDecoder {
    /// Subscribe to the data line and wait for the first valid packet.
    ///
    /// Fails with [`SensorError::NoTemperature`] when nothing valid
    /// arrives within `startup_attempts × startup_interval`.
    pub fn open(gpio: Arc<dyn GpioPort>, config: TsicConfig) -> Result<Self> {
        let listener = Arc::new(TsicListener {
            decoder: Mutex::new(FrameDecoder::new()),
            sample: Mutex::new(TemperatureSample::default()),
            min_c: config.min_c,
            max_c: config.max_c,
        });

        gpio.subscribe(config.pin, EdgeMode::Either, listener.clone())?;
        let decoder = Self {
            gpio,
            pin: config.pin,
            listener,
        };

        for _ in 0..config.startup_attempts {
            if decoder.temperature().valid {
                info!(
                    "TSIC ready on GPIO {}: {:.1}\u{00b0}C",
                    config.pin,
                    decoder.temperature().celsius
                );
                return Ok(decoder);
            }
            std::thread::sleep(config.startup_interval);
        }
        if decoder.temperature().valid {
            return Ok(decoder);
        }

        warn!("TSIC on GPIO {}: no valid packet during startup", config.pin);
        Err(SensorError::NoTemperature.into())
    }

    /// Last decoded temperature with the validity of the latest packet.
    pub fn current_temperature(&self) -> TemperatureSample {
        *lock(&self.listener.sample)
    }
}

impl TemperatureProbe for TemperatureDecoder {
    fn temperature(&self) -> TemperatureSample {
        self.current_temperature()
    }
}

impl Drop for TemperatureDecoder {
    fn drop(&mut self) {
        self.gpio.unsubscribe(self.pin);
    }
}
