// Order submission and ledger recording
pub mod recorder;

pub use recorder::{ExecutionRecorder, ExecutionReport};
