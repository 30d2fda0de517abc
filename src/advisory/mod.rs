//! Boundary to the external scoring ("watcher") and execution-planning
//! ("executor") services.

pub mod gateway;

pub use gateway::AdvisoryGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Decision, Liquidity, Opportunity, Position, RegimeFlags, TimeframeSummary};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdvisoryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("advisory service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed advisory response: {0}")]
    Malformed(String),
}

impl AdvisoryError {
    /// Worth another attempt: network trouble, throttling, server faults, or
    /// an unparseable answer the service may fix when told about it
    pub fn is_transient(&self) -> bool {
        match self {
            AdvisoryError::Transport(_) | AdvisoryError::Malformed(_) => true,
            AdvisoryError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
        }
    }
}

/// Payload for the scoring call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRequest {
    pub pair: String,
    pub short: TimeframeSummary,
    pub long: TimeframeSummary,
    pub liquidity: Liquidity,
    /// Error from the previous attempt, only set on retries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_error: Option<String>,
}

/// Risk context handed to execution planning alongside the opportunity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskContext {
    pub price: f64,
    pub atr: f64,
    pub spread_pct: f64,
    pub fees_pct: f64,
    pub available_capital: f64,
    pub stop_pct: f64,
    pub take_pct: f64,
    pub position: Option<Position>,
}

/// Payload for the execution-planning call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRequest {
    pub pair: String,
    pub p_up: f64,
    pub score: f64,
    pub regime: RegimeFlags,
    pub price: f64,
    pub atr: f64,
    pub spread_pct: f64,
    pub fees_pct: f64,
    pub available_capital: f64,
    pub suggested_stop_pct: f64,
    pub suggested_take_pct: f64,
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_error: Option<String>,
}

impl PlanRequest {
    pub fn new(opportunity: &Opportunity, context: &RiskContext) -> Self {
        Self {
            pair: opportunity.pair.clone(),
            p_up: opportunity.p_up,
            score: opportunity.score,
            regime: opportunity.regime.clone(),
            price: context.price,
            atr: context.atr,
            spread_pct: context.spread_pct,
            fees_pct: context.fees_pct,
            available_capital: context.available_capital,
            suggested_stop_pct: context.stop_pct,
            suggested_take_pct: context.take_pct,
            position: context.position.clone(),
            prior_error: None,
        }
    }
}

/// Raw calls to the advisory services, one attempt each
#[async_trait]
pub trait AdvisoryApi: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> Result<Opportunity, AdvisoryError>;

    async fn plan(&self, request: &PlanRequest) -> Result<Decision, AdvisoryError>;
}
