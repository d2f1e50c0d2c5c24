//! Named worker threads with a cooperative stop flag.
//!
//! Every independently clocked loop (flow meter, ranger, regulator,
//! brew controller) runs on its own OS thread.  The loop body checks
//! [`RunFlag::is_running`] at the top of each iteration; [`Worker::stop`]
//! clears the flag and joins, so stop latency is one loop period.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::error::{Error, Result};

/// Handed to the loop body; cleared when the owner stops the worker.
#[derive(Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owner handle for a running loop thread.  Stops and joins on drop.
pub struct Worker {
    name: &'static str,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a thread called `name`.
    pub fn spawn(name: &'static str, body: impl FnOnce(RunFlag) + Send + 'static) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = RunFlag(Arc::clone(&running));

        info!("Spawning '{}'", name);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || body(flag))
            .map_err(|e| {
                error!("'{}': thread creation failed: {}", name, e);
                Error::Init("thread creation failed")
            })?;

        Ok(Self {
            name,
            running,
            handle: Some(handle),
        })
    }

    /// Clear the run flag and wait for the loop to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("'{}' panicked", self.name);
            } else {
                info!("'{}' stopped", self.name);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep until `deadline`; returns immediately if it has passed.
pub fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}

/// Millisecond period helper.
pub fn period_ms(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms))
}
