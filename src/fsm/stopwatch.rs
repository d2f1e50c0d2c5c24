//! Monotonic stopwatch driven by externally supplied timestamps.
//!
//! Time is passed in rather than read, so the brew state machine can be
//! stepped with a manual clock.

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stopwatch {
    start: Duration,
    stop: Duration,
    running: bool,
}

impl Stopwatch {
    /// A stopwatch already running from `now`.
    pub fn started(now: Duration) -> Self {
        Self {
            start: now,
            stop: now,
            running: true,
        }
    }

    /// Zero the elapsed time and halt.
    pub fn reset(&mut self, now: Duration) {
        self.start = now;
        self.stop = now;
        self.running = false;
    }

    pub fn start(&mut self, now: Duration) {
        self.start = now;
        self.running = true;
    }

    /// Halt and return the elapsed time.  No-op on a halted stopwatch.
    pub fn stop(&mut self, now: Duration) -> Duration {
        if self.running {
            self.stop = now;
            self.running = false;
        }
        self.elapsed(now)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        if self.running {
            now.saturating_sub(self.start)
        } else {
            self.stop.saturating_sub(self.start)
        }
    }
}
