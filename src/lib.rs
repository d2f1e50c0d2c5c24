//! Espresso machine control core.
//!
//! Turns GPIO edge events into calibrated sensor readings, regulates
//! boiler temperature with a PID loop and runs the brew state machine.
//! The GPIO daemon, UI, settings storage and process entry point live
//! outside this crate and are reached through the traits in
//! [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod drivers;
pub mod error;
pub mod fsm;
pub mod pins;
pub mod sensors;

mod sync;
