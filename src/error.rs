use thiserror::Error;

use crate::engine::TriggerSource;

/// Errors surfaced by the decision engine
///
/// Cloneable so a failure can be carried inside a cycle's terminal event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("insufficient market data for {pair}: {detail}")]
    InsufficientData { pair: String, detail: String },

    #[error("advisory service unavailable after {attempts} attempts: {last_error}")]
    AdvisoryUnavailable { attempts: u32, last_error: String },

    #[error("order notional {notional:.2} below exchange minimum {minimum:.2}")]
    OrderTooSmall { notional: f64, minimum: f64 },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("multiple positions detected: {}", .0.join(", "))]
    MultiplePositionsDetected(Vec<String>),

    #[error("kill switch active: daily PnL {daily_pnl_pct:.2}% at or below limit")]
    KillSwitchActive { daily_pnl_pct: f64 },

    #[error("a {0} cycle is already in flight")]
    CycleInFlight(TriggerSource),

    #[error("cycle abandoned before execution")]
    Abandoned,

    #[error("no open position for {0}")]
    NoPosition(String),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Ledger(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EngineError::Ledger(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::Ledger(format!("redis: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Ledger(format!("serialization: {}", err))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
