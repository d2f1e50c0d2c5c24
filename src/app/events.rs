//! Outbound application events.
//!
//! The [`BrewService`](super::service::BrewService) emits these through
//! the [`EventSink`](super::ports::EventSink) port.  Adapters on the
//! other side decide what to do with them: write the system log, store
//! a shot file, refresh the UI.

use serde::Serialize;

use crate::fsm::BrewState;

/// Structured events emitted by the brew core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The brew core has started (carries initial state).
    Started(BrewState),

    /// The state machine moved between states.
    StateChanged { from: BrewState, to: BrewState },

    /// Periodic system-log record.
    Telemetry(TelemetryRecord),

    /// A shot long enough to keep.
    ShotCompleted(ShotReport),

    /// A flow episode too short to be a shot.
    ShotDiscarded { extraction_secs: f64 },
}

/// One row of the system or shot log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub system_secs: f64,
    pub extraction_secs: f64,
    pub temperature_c: f64,
    pub target_c: f64,
    pub raw_volume_ml: f64,
    /// Offset-corrected volume.
    pub volume_ml: f64,
    pub flow_speed_ml_s: f64,
    pub flow_state: &'static str,
    pub state: BrewState,
    /// Tank fill fraction, 0.0 (empty or unknown) to 1.0.
    pub water_level: f64,
}

impl TelemetryRecord {
    pub fn csv_header() -> &'static str {
        "systemTime;extractionTime;temperature;targetTemperature;rawVolume;volume;flowSpeed;flowState;brewState;waterLevel"
    }

    /// `;`-separated row matching [`csv_header`](Self::csv_header).
    pub fn to_csv(&self) -> String {
        format!(
            "{:.2};{:.2};{:.1};{:.1};{:.2};{:.2};{:.2};\"{}\";\"{}\";{:.2}",
            self.system_secs,
            self.extraction_secs,
            self.temperature_c,
            self.target_c,
            self.raw_volume_ml,
            self.volume_ml,
            self.flow_speed_ml_s,
            self.flow_state,
            self.state.as_str(),
            self.water_level,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShotKind {
    Manual,
    OneCup,
    TwoCups,
}

impl ShotKind {
    pub fn for_state(state: BrewState) -> Self {
        match state {
            BrewState::ExtractingOneCup => Self::OneCup,
            BrewState::ExtractingTwoCups => Self::TwoCups,
            _ => Self::Manual,
        }
    }

    pub fn state(self) -> BrewState {
        match self {
            Self::Manual => BrewState::Extracting,
            Self::OneCup => BrewState::ExtractingOneCup,
            Self::TwoCups => BrewState::ExtractingTwoCups,
        }
    }
}

/// Buffered shot log, handed out when the extraction ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotReport {
    pub kind: ShotKind,
    pub extraction_secs: f64,
    pub volume_ml: f64,
    pub records: Vec<TelemetryRecord>,
}
