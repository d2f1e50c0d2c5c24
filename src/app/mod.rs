//! Application core.
//!
//! Business rules of the espresso machine: brew state machine, command
//! guards, shot logging.  Hardware is reached only through the **port
//! traits** in [`ports`]; [`controller`] is where real components are
//! opened and plugged in.

pub mod commands;
pub mod controller;
pub mod events;
pub mod ports;
pub mod service;
