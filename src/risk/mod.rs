// Risk management: state, expected-value gate and decision gating
pub mod expected_value;
pub mod manager;
pub mod state;

pub use expected_value::EvAssessment;
pub use manager::{EntryScreen, GateContext, GatedDecision, RiskManager};
pub use state::RiskState;
