//! Actuator drivers, pin adapters and worker threads.

pub mod boiler;
pub mod pin;
pub mod pump;
pub mod worker;
