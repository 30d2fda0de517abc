use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::{TradeRecord, TradeStatus};

/// Process-wide risk bookkeeping
///
/// Daily PnL, available capital and the per-pair cooldown table. The
/// kill switch is derived from daily PnL, never stored. Mutated only
/// through the methods below, by the execution recorder and the
/// controller's analysis stamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    pub initial_capital: f64,
    pub available_capital: f64,
    pub daily_pnl: f64,
    pub trading_day: NaiveDate,
    /// Closed trades at or after this instant count toward daily PnL
    pub pnl_since: DateTime<Utc>,
    pub last_analyzed: HashMap<String, DateTime<Utc>>,
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

impl RiskState {
    pub fn new(initial_capital: f64, now: DateTime<Utc>) -> Self {
        Self {
            initial_capital,
            available_capital: initial_capital,
            daily_pnl: 0.0,
            trading_day: now.date_naive(),
            pnl_since: start_of_day(now),
            last_analyzed: HashMap::new(),
        }
    }

    /// Daily PnL as a fraction of initial capital
    pub fn daily_pnl_pct(&self) -> f64 {
        if self.initial_capital > 0.0 {
            self.daily_pnl / self.initial_capital
        } else {
            0.0
        }
    }

    pub fn kill_switch_active(&self, daily_loss_limit: f64) -> bool {
        self.daily_pnl_pct() <= daily_loss_limit
    }

    pub fn check_kill_switch(&self, daily_loss_limit: f64) -> Result<(), EngineError> {
        if self.kill_switch_active(daily_loss_limit) {
            return Err(EngineError::KillSwitchActive {
                daily_pnl_pct: self.daily_pnl_pct() * 100.0,
            });
        }
        Ok(())
    }

    pub fn in_cooldown(&self, pair: &str, now: DateTime<Utc>, period: Duration) -> bool {
        self.last_analyzed
            .get(pair)
            .map(|last| now.signed_duration_since(*last) < period)
            .unwrap_or(false)
    }

    /// Pairs not in cooldown, input order preserved
    pub fn eligible_pairs(
        &self,
        pairs: &[String],
        now: DateTime<Utc>,
        period: Duration,
    ) -> Vec<String> {
        pairs
            .iter()
            .filter(|pair| !self.in_cooldown(pair, now, period))
            .cloned()
            .collect()
    }

    pub fn record_analysis(&mut self, pair: &str, now: DateTime<Utc>) {
        self.last_analyzed.insert(pair.to_string(), now);
    }

    pub fn record_close(&mut self, realized_pnl: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.daily_pnl += realized_pnl;
    }

    pub fn set_available_capital(&mut self, capital: f64) {
        self.available_capital = capital.max(0.0);
    }

    /// Start a new trading day if the UTC date changed. Returns true on rollover.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.trading_day {
            return false;
        }

        tracing::info!(
            previous = %self.trading_day,
            today = %today,
            daily_pnl = self.daily_pnl,
            "Trading day rolled over, resetting daily PnL"
        );
        self.trading_day = today;
        self.daily_pnl = 0.0;
        self.pnl_since = start_of_day(now);
        true
    }

    /// Operator reset: clears daily PnL and the cooldown table
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.daily_pnl = 0.0;
        self.trading_day = now.date_naive();
        self.pnl_since = now;
        self.last_analyzed.clear();
    }

    /// Recompute daily PnL from Closed ledger records since `pnl_since`
    pub fn rederive_daily_pnl(&mut self, ledger: &[TradeRecord], now: DateTime<Utc>) {
        self.roll_day(now);
        self.daily_pnl = ledger
            .iter()
            .filter(|r| r.status == TradeStatus::Closed && r.timestamp >= self.pnl_since)
            .map(|r| r.realized_pnl)
            .sum();
    }
}
