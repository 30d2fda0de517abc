//! Market snapshot construction
//!
//! Fetches two candle series plus the book top for a pair and reduces them
//! to the indicator summary the scoring service consumes. Everything after
//! the fetch is a pure function of the inputs.
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{ExecutionSettings, TradingSettings};
use crate::error::EngineError;
use crate::exchange::{BookTicker, ExchangeApi};
use crate::indicators::{
    calculate_adx, calculate_atr, calculate_ema, calculate_sma, classify_trend, close_zscore,
    closes,
};
use crate::models::{Candle, Liquidity, MarketSnapshot, TimeframeSummary};
use crate::Result;

const SMA_PERIOD: usize = 20;
const EMA_FAST_PERIOD: usize = 20;
const EMA_SLOW_PERIOD: usize = 50;
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const ZSCORE_WINDOW: usize = 20;

pub struct SnapshotBuilder {
    exchange: Arc<dyn ExchangeApi>,
    short_interval: String,
    short_limit: u32,
    long_interval: String,
    long_limit: u32,
    base_slippage_pct: f64,
}

impl SnapshotBuilder {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        trading: &TradingSettings,
        execution: &ExecutionSettings,
    ) -> Self {
        Self {
            exchange,
            short_interval: trading.short_interval.clone(),
            short_limit: trading.short_limit,
            long_interval: trading.long_interval.clone(),
            long_limit: trading.long_limit,
            base_slippage_pct: execution.base_slippage_pct,
        }
    }

    pub async fn build(&self, pair: &str) -> Result<MarketSnapshot> {
        let (short, long, ticker) = tokio::try_join!(
            self.exchange
                .klines(pair, &self.short_interval, self.short_limit),
            self.exchange.klines(pair, &self.long_interval, self.long_limit),
            self.exchange.book_ticker(pair),
        )?;

        tracing::debug!(
            pair,
            short = short.len(),
            long = long.len(),
            "Fetched market data"
        );

        assemble(
            pair,
            (&self.short_interval, short),
            (&self.long_interval, long),
            ticker,
            self.base_slippage_pct,
            Utc::now(),
        )
    }
}

/// Combine fetched series into a snapshot
pub fn assemble(
    pair: &str,
    short: (&str, Vec<Candle>),
    long: (&str, Vec<Candle>),
    ticker: BookTicker,
    base_slippage_pct: f64,
    built_at: DateTime<Utc>,
) -> Result<MarketSnapshot> {
    let (short_interval, short_candles) = short;
    let (long_interval, long_candles) = long;

    for (interval, candles) in [(short_interval, &short_candles), (long_interval, &long_candles)] {
        if candles.is_empty() {
            return Err(EngineError::InsufficientData {
                pair: pair.to_string(),
                detail: format!("no {} candles returned", interval),
            });
        }
    }

    let short_summary = summarize(short_interval, &short_candles);
    let long_summary = summarize(long_interval, &long_candles);

    let price = if ticker.bid > 0.0 && ticker.ask > 0.0 {
        ticker.mid()
    } else {
        short_summary.last_close
    };

    let spread_pct = ticker.spread_pct();
    let quote_volume = short_candles.iter().map(|c| c.volume * c.close).sum();

    Ok(MarketSnapshot {
        pair: pair.to_string(),
        price,
        short: short_summary,
        long: long_summary,
        liquidity: Liquidity {
            bid: ticker.bid,
            ask: ticker.ask,
            spread_pct,
            slippage_pct: spread_pct / 2.0 + base_slippage_pct,
            quote_volume,
        },
        short_candles,
        long_candles,
        built_at,
    })
}

/// Indicator summary for one timeframe
pub fn summarize(interval: &str, candles: &[Candle]) -> TimeframeSummary {
    let prices = closes(candles);
    let last_close = prices.last().copied().unwrap_or(0.0);

    let ema_fast = calculate_ema(&prices, EMA_FAST_PERIOD);
    let ema_slow = calculate_ema(&prices, EMA_SLOW_PERIOD);
    let atr = calculate_atr(candles, ATR_PERIOD);
    let adx = calculate_adx(candles, ADX_PERIOD);

    TimeframeSummary {
        interval: interval.to_string(),
        candles: candles.len(),
        last_close,
        sma_fast: calculate_sma(&prices, SMA_PERIOD),
        ema_fast,
        ema_slow,
        atr,
        atr_pct: if last_close > 0.0 { atr / last_close } else { 0.0 },
        volatility_z: close_zscore(&prices, ZSCORE_WINDOW),
        adx: adx.map(|a| a.adx),
        trend: classify_trend(last_close, ema_fast, ema_slow, adx),
    }
}
