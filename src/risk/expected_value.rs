use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Stop/take distances and the expected value of an entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvAssessment {
    pub stop_pct: f64,
    pub take_pct: f64,
    /// Fees plus estimated slippage
    pub costs: f64,
    pub ev: f64,
    pub spread_pct: f64,
    pub spread_ok: bool,
}

impl EvAssessment {
    pub fn passes(&self) -> bool {
        self.ev > 0.0 && self.spread_ok
    }

    /// Human-readable reason when the gate refuses the entry
    pub fn rejection(&self) -> Option<String> {
        if !self.spread_ok {
            Some(format!("spread {:.4}% above maximum", self.spread_pct * 100.0))
        } else if self.ev <= 0.0 {
            Some(format!("EV {:.5} <= 0", self.ev))
        } else {
            None
        }
    }
}

/// `stop = max(min_stop, k * ATR / price)`
pub fn stop_pct(price: f64, atr: f64, config: &RiskConfig) -> f64 {
    let atr_stop = if price > 0.0 && atr.is_finite() {
        config.atr_stop_multiple * atr / price
    } else {
        0.0
    };
    atr_stop.max(config.min_stop_pct)
}

/// Fixed reward multiple of the stop, bounded above
pub fn take_pct(stop_pct: f64, config: &RiskConfig) -> f64 {
    (stop_pct * config.reward_multiple).min(config.max_take_pct)
}

/// `EV = p_up * take - (1 - p_up) * stop - costs`
pub fn expected_value(p_up: f64, stop_pct: f64, take_pct: f64, costs: f64) -> f64 {
    p_up * take_pct - (1.0 - p_up) * stop_pct - costs
}

pub fn assess(
    p_up: f64,
    price: f64,
    atr: f64,
    spread_pct: f64,
    slippage_pct: f64,
    config: &RiskConfig,
) -> EvAssessment {
    let stop = stop_pct(price, atr, config);
    let take = take_pct(stop, config);
    let costs = config.fee_pct + slippage_pct;

    EvAssessment {
        stop_pct: stop,
        take_pct: take,
        costs,
        ev: expected_value(p_up, stop, take, costs),
        spread_pct,
        spread_ok: spread_pct <= config.max_spread_pct,
    }
}
