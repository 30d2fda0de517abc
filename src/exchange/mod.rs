// Exchange boundary: the calls the engine makes against the trading venue
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;
use crate::models::{Candle, OrderKind};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    /// Network failure, timeout, or no response at all
    #[error("transport error: {0}")]
    Transport(String),
    /// Exchange answered with a non-2xx status or an embedded error payload
    #[error("exchange rejected request (status {status}, code {code:?}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    #[error("failed to decode exchange response: {0}")]
    Decode(String),
}

impl From<ExchangeError> for EngineError {
    fn from(err: ExchangeError) -> Self {
        EngineError::Exchange(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookTicker {
    pub bid: f64,
    pub ask: f64,
}

impl BookTicker {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Relative spread against the mid price
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid > 0.0 {
            (self.ask - self.bid) / mid
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order to submit
///
/// Market buys are sized in quote currency (`quote_notional`); sells and
/// limit orders are sized in base quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Option<f64>,
    pub quote_notional: Option<f64>,
    pub price: Option<f64>,
}

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: Option<String>,
    pub status: String,
    pub executed_qty: f64,
    pub quote_qty: f64,
}

impl OrderAck {
    /// Average fill price, None when nothing filled yet
    pub fn average_price(&self) -> Option<f64> {
        if self.executed_qty > 0.0 && self.quote_qty > 0.0 {
            Some(self.quote_qty / self.executed_qty)
        } else {
            None
        }
    }
}

/// One historical fill from the exchange's own trade history
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeFill {
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub quote_qty: f64,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn ping(&self) -> Result<(), ExchangeError>;

    async fn balances(&self) -> Result<Vec<AssetBalance>, ExchangeError>;

    /// Most recent `limit` candles, oldest first
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, ExchangeError>;

    async fn price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    /// Account fills for a symbol, oldest first
    async fn trades(&self, symbol: &str) -> Result<Vec<ExchangeFill>, ExchangeError>;
}

/// Base asset of a pair quoted in `quote` ("SOLUSDT" -> "SOL")
pub fn base_asset<'a>(pair: &'a str, quote: &str) -> &'a str {
    pair.strip_suffix(quote).unwrap_or(pair)
}
