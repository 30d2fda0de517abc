use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// OHLCV candlestick for one pair at one interval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub pair: String,
    pub timestamp: DateTime<Utc>, // Open time
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trend label derived from moving averages + ADX
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

/// Indicator summary for a single timeframe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeframeSummary {
    pub interval: String,
    pub candles: usize,
    pub last_close: f64,
    pub sma_fast: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub atr: f64,
    pub atr_pct: f64,
    pub volatility_z: f64,
    pub adx: Option<f64>,
    pub trend: Trend,
}

/// Liquidity metrics taken from the order book top
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Liquidity {
    pub bid: f64,
    pub ask: f64,
    pub spread_pct: f64,
    pub slippage_pct: f64,
    pub quote_volume: f64,
}

/// Immutable market view of one pair, rebuilt every cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub pair: String,
    pub price: f64,
    pub short_candles: Vec<Candle>,
    pub long_candles: Vec<Candle>,
    pub short: TimeframeSummary,
    pub long: TimeframeSummary,
    pub liquidity: Liquidity,
    pub built_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// ATR of the short timeframe, used for stop sizing
    pub fn atr(&self) -> f64 {
        self.short.atr
    }
}

/// Regime context attached to an opportunity by the scoring service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegimeFlags {
    #[serde(default)]
    pub trending: bool,
    #[serde(default)]
    pub high_volatility: bool,
    #[serde(default)]
    pub risk_off: bool,
}

/// Scored buy opportunity for one pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Opportunity {
    pub pair: String,
    pub p_up: f64,
    pub score: f64,
    #[serde(default)]
    pub regime: RegimeFlags,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
}

/// Exit-condition flags returned when a position is being managed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExitFlags {
    #[serde(rename = "technicalStructureOK")]
    pub technical_structure_ok: bool,
    #[serde(rename = "evOK")]
    pub ev_ok: bool,
}

/// Trading decision for one pair
///
/// `action == Hold` always implies `notional == 0.0`; use [`Decision::hold`]
/// or [`Decision::into_hold`] to build one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub pair: String,
    pub action: Action,
    #[serde(default)]
    pub order_kind: OrderKind,
    #[serde(default, rename = "notional_usdt")]
    pub notional: f64,
    #[serde(default)]
    pub stop_pct: Option<f64>,
    #[serde(default)]
    pub take_pct: Option<f64>,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub exit_flags: Option<ExitFlags>,
}

/// Pair carried by decisions that concern no particular pair
pub const NO_PAIR: &str = "*";

impl Decision {
    /// HOLD for a cycle that ended before any pair was chosen
    pub fn no_op(rationale: impl Into<String>) -> Self {
        Self::hold(NO_PAIR, rationale)
    }

    pub fn hold(pair: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            action: Action::Hold,
            order_kind: OrderKind::Market,
            notional: 0.0,
            stop_pct: None,
            take_pct: None,
            limit_price: None,
            confidence: 0.0,
            rationale: rationale.into(),
            exit_flags: None,
        }
    }

    /// Downgrade to HOLD, keeping the pair and appending the reason
    pub fn into_hold(mut self, reason: &str) -> Self {
        self.action = Action::Hold;
        self.notional = 0.0;
        self.limit_price = None;
        if self.rationale.is_empty() {
            self.rationale = reason.to_string();
        } else {
            self.rationale = format!("{} [{}]", self.rationale, reason);
        }
        self
    }

    pub fn is_hold(&self) -> bool {
        self.action == Action::Hold
    }
}

/// The single open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub pair: String,
    pub entry_price: f64,
    /// Invested notional in quote currency
    pub size: f64,
    pub quantity: f64,
    pub stop_pct: Option<f64>,
    pub take_pct: Option<f64>,
    pub opened_at: Option<DateTime<Utc>>,
    /// False when entry was not recoverable from any history
    pub entry_reliable: bool,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    /// Price change since entry as a fraction, None when entry is unknown
    pub fn change_pct(&self, price: f64) -> Option<f64> {
        if self.entry_reliable && self.entry_price > 0.0 {
            Some((price - self.entry_price) / self.entry_price)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    Closed,
    Logged,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "Open",
            TradeStatus::Closed => "Closed",
            TradeStatus::Logged => "Logged",
            TradeStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Open" => Some(TradeStatus::Open),
            "Closed" => Some(TradeStatus::Closed),
            "Logged" => Some(TradeStatus::Logged),
            "Failed" => Some(TradeStatus::Failed),
            _ => None,
        }
    }
}

/// Ledger entry before the store assigns id and timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTradeRecord {
    pub pair: String,
    pub action: Action,
    pub price: f64,
    pub notional: f64,
    pub quantity: f64,
    pub realized_pnl: f64,
    pub rationale: String,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub stop_pct: Option<f64>,
    pub take_pct: Option<f64>,
}

/// Immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub pair: String,
    pub action: Action,
    pub price: f64,
    pub notional: f64,
    pub quantity: f64,
    pub realized_pnl: f64,
    pub rationale: String,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub stop_pct: Option<f64>,
    pub take_pct: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn from_new(id: Uuid, record: NewTradeRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            pair: record.pair,
            action: record.action,
            price: record.price,
            notional: record.notional,
            quantity: record.quantity,
            realized_pnl: record.realized_pnl,
            rationale: record.rationale,
            status: record.status,
            order_id: record.order_id,
            stop_pct: record.stop_pct,
            take_pct: record.take_pct,
            timestamp,
        }
    }

    /// True for records that moved money on the exchange
    pub fn is_fill(&self) -> bool {
        matches!(self.status, TradeStatus::Open | TradeStatus::Closed)
    }
}
