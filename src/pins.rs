//! GPIO pin assignments for the espresso machine controller board.
//!
//! Single source of truth for the default wiring (BCM numbering).  The
//! values are copied into [`PinMap`](crate::config::PinMap) so a board
//! revision can override them through configuration.

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// TSIC 306 data line (self-clocked single-wire protocol).
pub const TSIC_GPIO: u8 = 15;
/// Hall-effect flow meter pulse output.
pub const FLOW_GPIO: u8 = 14;
/// HC-SR04 trigger input (driven by us).
pub const RANGER_TRIGGER_GPIO: u8 = 27;
/// HC-SR04 echo output.
pub const RANGER_ECHO_GPIO: u8 = 22;

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

/// Vibration pump solid-state relay.  HIGH = pump running.
pub const PUMP_GPIO: u8 = 23;
/// Boiler solid-state relay, driven with slow PWM.
pub const BOILER_GPIO: u8 = 24;
