//! Sensor subsystem.
//!
//! Each sensor subscribes to edges on its own pin, keeps its sample
//! behind its own lock, and publishes a consistent snapshot through the
//! matching probe port.

pub mod flow;
pub mod ranger;
pub mod tsic;
