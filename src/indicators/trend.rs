use crate::indicators::adx::Adx;
use crate::models::Trend;

/// ADX at or above this counts as a directional market
pub const ADX_TREND_THRESHOLD: f64 = 20.0;

/// Label trend from a fast/slow EMA cross confirmed by ADX
///
/// UP needs fast > slow, price above fast, +DI > -DI and ADX >= threshold.
/// DOWN is the mirror. Anything else, or missing inputs, is SIDEWAYS.
pub fn classify_trend(
    price: f64,
    ema_fast: Option<f64>,
    ema_slow: Option<f64>,
    adx: Option<Adx>,
) -> Trend {
    let (Some(fast), Some(slow), Some(adx)) = (ema_fast, ema_slow, adx) else {
        return Trend::Sideways;
    };

    if adx.adx < ADX_TREND_THRESHOLD {
        return Trend::Sideways;
    }

    if fast > slow && price >= fast && adx.plus_di > adx.minus_di {
        Trend::Up
    } else if fast < slow && price <= fast && adx.minus_di > adx.plus_di {
        Trend::Down
    } else {
        Trend::Sideways
    }
}
