//! Average True Range (ATR)
//!
//! True range of a candle is the largest of:
//! - high - low
//! - |high - previous close|
//! - |low - previous close|
//!
//! The first candle has no previous close, so its true range is high - low.
//! ATR here is the plain average of the last `period` true ranges.
use crate::models::Candle;

/// True range for every candle, aligned with the input
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let range = candle.high - candle.low;
            match i.checked_sub(1).map(|p| candles[p].close) {
                Some(prev_close) => range
                    .max((candle.high - prev_close).abs())
                    .max((candle.low - prev_close).abs()),
                None => range,
            }
        })
        .collect()
}

/// ATR over the last `period` candles
///
/// Returns 0.0 when fewer than `period` candles are available.
pub fn calculate_atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period {
        return 0.0;
    }

    let ranges = true_ranges(candles);
    ranges.iter().rev().take(period).sum::<f64>() / period as f64
}
