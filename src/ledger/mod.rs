//! Append-only trade ledger. The authoritative history the position and
//! daily PnL are re-derived from.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use async_trait::async_trait;

use crate::models::{NewTradeRecord, TradeRecord};
use crate::Result;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a record; the store assigns id and timestamp
    async fn append(&self, record: NewTradeRecord) -> Result<TradeRecord>;

    /// Every record, oldest first
    async fn history(&self) -> Result<Vec<TradeRecord>>;

    async fn history_for(&self, pair: &str) -> Result<Vec<TradeRecord>> {
        Ok(self
            .history()
            .await?
            .into_iter()
            .filter(|r| r.pair == pair)
            .collect())
    }
}
