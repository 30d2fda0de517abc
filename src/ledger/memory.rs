use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::LedgerStore;
use crate::models::{NewTradeRecord, TradeRecord};
use crate::Result;

/// In-process ledger for dry runs and tests
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<TradeRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing history, e.g. to simulate a restart
    pub fn with_records(mut records: Vec<TradeRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            records: Mutex::new(records),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn append(&self, record: NewTradeRecord) -> Result<TradeRecord> {
        let mut records = self.records.lock().await;

        // Keep timestamps non-decreasing so read-back order equals append order
        let now = Utc::now();
        let timestamp = records
            .last()
            .map(|last| last.timestamp.max(now))
            .unwrap_or(now);

        let stored = TradeRecord::from_new(Uuid::new_v4(), record, timestamp);
        records.push(stored.clone());
        Ok(stored)
    }

    async fn history(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, TradeStatus};

    fn new_record(pair: &str, action: Action, status: TradeStatus) -> NewTradeRecord {
        NewTradeRecord {
            pair: pair.to_string(),
            action,
            price: 100.0,
            notional: 50.0,
            quantity: 0.5,
            realized_pnl: 0.0,
            rationale: "test".to_string(),
            status,
            order_id: None,
            stop_pct: None,
            take_pct: None,
        }
    }

    #[tokio::test]
    async fn test_append_assigns_id_and_orders_by_time() {
        let ledger = MemoryLedger::new();
        let first = ledger
            .append(new_record("SOLUSDT", Action::Buy, TradeStatus::Open))
            .await
            .unwrap();
        let second = ledger
            .append(new_record("ETHUSDT", Action::Hold, TradeStatus::Logged))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert!(first.timestamp <= second.timestamp);

        let history = ledger.history().await.unwrap();
        assert_eq!(history, vec![first.clone(), second]);

        let sol = ledger.history_for("SOLUSDT").await.unwrap();
        assert_eq!(sol, vec![first]);
    }
}
