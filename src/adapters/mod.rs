//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements  | Connects to                   |
//! |------------|-------------|-------------------------------|
//! | `log_sink` | EventSink   | `log` facade                  |
//! | `sim`      | GpioPort    | in-memory edge source         |
//! | `time`     | Clock       | `Instant` / manual test clock |

pub mod log_sink;
pub mod sim;
pub mod time;
