use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::models::{Action, NewTradeRecord, TradeRecord, TradeStatus};
use crate::Result;

/// Postgres-backed ledger
///
/// Rows are only ever inserted; `recorded_at` comes from the server clock.
pub struct PostgresLedger {
    pool: PgPool,
}

fn to_decimal(value: f64, field: &str) -> Result<Decimal> {
    Decimal::try_from(value)
        .map_err(|e| EngineError::Ledger(format!("cannot store {} = {}: {}", field, value, e)))
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn parse_action(s: &str) -> Result<Action> {
    match s {
        "BUY" => Ok(Action::Buy),
        "SELL" => Ok(Action::Sell),
        "HOLD" => Ok(Action::Hold),
        other => Err(EngineError::Ledger(format!("invalid action '{}'", other))),
    }
}

fn record_from_row(row: &PgRow) -> Result<TradeRecord> {
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let stop_pct: Option<Decimal> = row.try_get("stop_pct")?;
    let take_pct: Option<Decimal> = row.try_get("take_pct")?;
    let timestamp: DateTime<Utc> = row.try_get("recorded_at")?;

    Ok(TradeRecord {
        id: row.try_get::<Uuid, _>("id")?,
        pair: row.try_get("pair")?,
        action: parse_action(&action)?,
        price: to_f64(row.try_get("price")?),
        notional: to_f64(row.try_get("notional")?),
        quantity: to_f64(row.try_get("quantity")?),
        realized_pnl: to_f64(row.try_get("realized_pnl")?),
        rationale: row.try_get("rationale")?,
        status: TradeStatus::parse(&status)
            .ok_or_else(|| EngineError::Ledger(format!("invalid status '{}'", status)))?,
        order_id: row.try_get("order_id")?,
        stop_pct: stop_pct.map(to_f64),
        take_pct: take_pct.map(to_f64),
        timestamp,
    })
}

impl PostgresLedger {
    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres ledger");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn append(&self, record: NewTradeRecord) -> Result<TradeRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO trade_records (
                id, pair, action, price, notional, quantity, realized_pnl,
                rationale, status, order_id, stop_pct, take_pct, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            RETURNING id, pair, action, price, notional, quantity, realized_pnl,
                      rationale, status, order_id, stop_pct, take_pct, recorded_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.pair)
        .bind(record.action.to_string())
        .bind(to_decimal(record.price, "price")?)
        .bind(to_decimal(record.notional, "notional")?)
        .bind(to_decimal(record.quantity, "quantity")?)
        .bind(to_decimal(record.realized_pnl, "realized_pnl")?)
        .bind(&record.rationale)
        .bind(record.status.as_str())
        .bind(&record.order_id)
        .bind(record.stop_pct.map(|v| to_decimal(v, "stop_pct")).transpose()?)
        .bind(record.take_pct.map(|v| to_decimal(v, "take_pct")).transpose()?)
        .fetch_one(&self.pool)
        .await?;

        let stored = record_from_row(&row)?;
        tracing::debug!(
            id = %stored.id,
            pair = %stored.pair,
            status = stored.status.as_str(),
            "Appended trade record"
        );
        Ok(stored)
    }

    async fn history(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, action, price, notional, quantity, realized_pnl,
                   rationale, status, order_id, stop_pct, take_pct, recorded_at
            FROM trade_records
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn history_for(&self, pair: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, pair, action, price, notional, quantity, realized_pnl,
                   rationale, status, order_id, stop_pct, take_pct, recorded_at
            FROM trade_records
            WHERE pair = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(pair)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_conversion() {
        let d = to_decimal(0.0125, "stop_pct").unwrap();
        assert!((to_f64(d) - 0.0125).abs() < 1e-12);
        assert!(to_decimal(f64::NAN, "price").is_err());
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("SELL").unwrap(), Action::Sell);
        assert!(parse_action("sell").is_err());
    }
}
