//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing application events through the
//! `log` facade, so the embedding process decides whether they reach the
//! console, a file or syslog.  Shot reports are serialised as JSON.

use log::{info, warn};

use crate::app::events::{AppEvent, TelemetryRecord};
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Default)]
pub struct LogEventSink {
    header_written: bool,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                if !self.header_written {
                    info!("TELEM | {}", TelemetryRecord::csv_header());
                    self.header_written = true;
                }
                info!("TELEM | {}", t.to_csv());
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            AppEvent::Started(state) => {
                info!("START | initial_state={}", state);
            }
            AppEvent::ShotCompleted(report) => match serde_json::to_string(report) {
                Ok(json) => info!("SHOT | {}", json),
                Err(e) => warn!("SHOT | report not serialisable: {}", e),
            },
            AppEvent::ShotDiscarded { extraction_secs } => {
                info!("SHOT | discarded after {:.1}s", extraction_secs);
            }
        }
    }
}
