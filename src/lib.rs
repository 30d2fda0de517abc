// Core modules
pub mod advisory;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod persistence;
pub mod reconcile;
pub mod risk;
pub mod selection;
pub mod snapshot;

// Re-export commonly used types
pub use config::Settings;
pub use engine::{EngineController, EngineDeps, OperatingMode, TriggerSource};
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
