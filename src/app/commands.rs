//! Inbound commands to the brew controller.
//!
//! These represent actions requested by the outside world (touch UI,
//! CLI) that the [`BrewService`](super::service::BrewService)
//! interprets.  Commands that are illegal in the current state are
//! ignored, never errors.

use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;
use crate::fsm::BrewState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CupSize {
    One,
    Two,
}

impl CupSize {
    /// The automatic extraction state for this size.
    pub fn state(self) -> BrewState {
        match self {
            Self::One => BrewState::ExtractingOneCup,
            Self::Two => BrewState::ExtractingTwoCups,
        }
    }

    /// Target (offset-corrected) volume in mL.
    pub fn target_ml(self, config: &SystemConfig) -> f64 {
        match self {
            Self::One => config.one_cup_ml,
            Self::Two => config.two_cups_ml,
        }
    }
}

/// Commands that external adapters can send into the brew core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrewCommand {
    /// Machine on (preheat) or off.
    Power(bool),
    /// Start an automatic extraction.
    Extract(CupSize),
    /// Enter or leave steam mode.
    SetSteamMode(bool),
}
