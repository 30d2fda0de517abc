use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::Position;
use crate::risk::RiskState;

/// Process-wide engine state: risk bookkeeping plus the derived position
#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub risk: RiskState,
    pub position: Option<Position>,
    /// Set while reconciliation sees more than one held asset
    pub anomaly: Option<Vec<String>>,
    pub last_reconciled: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn new(risk: RiskState) -> Self {
        Self {
            risk,
            position: None,
            anomaly: None,
            last_reconciled: None,
        }
    }
}

pub type SharedState = Arc<RwLock<EngineState>>;
