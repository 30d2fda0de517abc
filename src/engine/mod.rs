// Decision engine: streaming cycle controller, autopilot and shared state
pub mod autopilot;
pub mod controller;
pub mod events;
pub mod state;

#[cfg(test)]
pub(crate) mod fakes;

pub use autopilot::{Autopilot, TickOutcome};
pub use controller::{EngineController, EngineDeps, EngineStatus};
pub use events::{CycleEvent, CycleOutcome, CycleStream, Stage};
pub use state::{EngineState, SharedState};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Autonomous,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Manual => f.write_str("manual"),
            TriggerSource::Autonomous => f.write_str("autonomous"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Manual,
    Autonomous,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Manual => f.write_str("manual"),
            OperatingMode::Autonomous => f.write_str("autonomous"),
        }
    }
}
