use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::models::{Action, Decision, MarketSnapshot, Opportunity, Position};
use crate::risk::expected_value::{self, EvAssessment};
use crate::risk::state::RiskState;

/// Outcome of screening a new entry before execution planning
#[derive(Debug, Clone, PartialEq)]
pub enum EntryScreen {
    Proceed(EvAssessment),
    Hold(Decision),
}

/// Decision after every gate has run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatedDecision {
    pub decision: Decision,
    /// True when the decision should be sent to the exchange
    pub execute: bool,
    pub notes: Vec<String>,
}

/// Inputs to the final gate pass
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub position: Option<&'a Position>,
    pub available_capital: f64,
    pub kill_switch_active: bool,
    pub ev: Option<&'a EvAssessment>,
    /// Operator-approved execution skips the confidence threshold only
    pub bypass_confidence: bool,
}

/// Applies the risk gates in order: kill switch, EV, sizing, confidence
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Largest notional a new entry may use
    pub fn entry_cap(&self, available_capital: f64) -> f64 {
        (available_capital * self.config.risk_per_trade).max(0.0)
    }

    pub fn kill_switch_active(&self, state: &RiskState) -> bool {
        state.kill_switch_active(self.config.daily_loss_limit)
    }

    pub fn assess(&self, opportunity: &Opportunity, snapshot: &MarketSnapshot) -> EvAssessment {
        expected_value::assess(
            opportunity.p_up,
            snapshot.price,
            snapshot.atr(),
            snapshot.liquidity.spread_pct,
            snapshot.liquidity.slippage_pct,
            &self.config,
        )
    }

    /// Kill switch and EV gate for a prospective entry
    pub fn screen_entry(
        &self,
        state: &RiskState,
        opportunity: &Opportunity,
        snapshot: &MarketSnapshot,
    ) -> EntryScreen {
        if let Err(e) = state.check_kill_switch(self.config.daily_loss_limit) {
            tracing::info!(pair = %opportunity.pair, "Entry refused: {}", e);
            return EntryScreen::Hold(Decision::hold(&opportunity.pair, e.to_string()));
        }

        let assessment = self.assess(opportunity, snapshot);
        if let Some(reason) = assessment.rejection() {
            tracing::info!(
                pair = %opportunity.pair,
                p_up = opportunity.p_up,
                ev = assessment.ev,
                stop_pct = assessment.stop_pct,
                take_pct = assessment.take_pct,
                "EV gate forced HOLD: {}",
                reason
            );
            let mut hold = Decision::hold(&opportunity.pair, opportunity.rationale.clone());
            hold.stop_pct = Some(assessment.stop_pct);
            hold.take_pct = Some(assessment.take_pct);
            return EntryScreen::Hold(hold.into_hold(&reason));
        }

        EntryScreen::Proceed(assessment)
    }

    /// Forced SELL when price has crossed the position's stop or take
    pub fn protective_exit(&self, position: &Position, price: f64) -> Option<Decision> {
        let change = position.change_pct(price)?;

        let reason = match (position.stop_pct, position.take_pct) {
            (Some(stop), _) if change <= -stop => format!(
                "stop loss hit: {:.2}% vs -{:.2}%",
                change * 100.0,
                stop * 100.0
            ),
            (_, Some(take)) if change >= take => format!(
                "take profit hit: {:.2}% vs +{:.2}%",
                change * 100.0,
                take * 100.0
            ),
            _ => return None,
        };

        tracing::info!(pair = %position.pair, price, "{}", reason);

        Some(Decision {
            pair: position.pair.clone(),
            action: Action::Sell,
            order_kind: Default::default(),
            notional: position.size,
            stop_pct: position.stop_pct,
            take_pct: position.take_pct,
            limit_price: None,
            confidence: 1.0,
            rationale: reason,
            exit_flags: None,
        })
    }

    /// Reason to refuse an entry quoted at `spread_pct`, if it is too wide
    pub fn spread_rejection(&self, spread_pct: f64) -> Option<String> {
        (spread_pct > self.config.max_spread_pct)
            .then(|| format!("spread {:.4}% above maximum", spread_pct * 100.0))
    }

    /// Final pass: position consistency, kill switch, sizing, confidence
    ///
    /// The advisory's action is never rewritten into a different trade; it is
    /// either kept or downgraded to HOLD, and `execute` says whether it goes
    /// to the exchange.
    pub fn gate(&self, decision: Decision, ctx: GateContext<'_>) -> GatedDecision {
        let mut notes = Vec::new();

        let mut decision = match decision.action {
            Action::Hold => Decision {
                notional: 0.0,
                limit_price: None,
                ..decision
            },
            Action::Buy => {
                if let Some(position) = ctx.position {
                    let reason = format!("position already open on {}", position.pair);
                    notes.push(reason.clone());
                    decision.into_hold(&reason)
                } else if ctx.kill_switch_active {
                    let reason = "kill switch active".to_string();
                    notes.push(reason.clone());
                    decision.into_hold(&reason)
                } else if ctx.ev.map(|ev| !ev.passes()).unwrap_or(false) {
                    let reason = ctx
                        .ev
                        .and_then(|ev| ev.rejection())
                        .unwrap_or_else(|| "EV gate".to_string());
                    notes.push(reason.clone());
                    decision.into_hold(&reason)
                } else {
                    self.size_entry(decision, &ctx, &mut notes)
                }
            }
            Action::Sell => match ctx.position {
                Some(position) if position.pair == decision.pair => {
                    if (decision.notional - position.size).abs() > f64::EPSILON {
                        notes.push(format!(
                            "exit notional set to position size {:.2}",
                            position.size
                        ));
                    }
                    Decision {
                        notional: position.size,
                        ..decision
                    }
                }
                _ => {
                    let reason = format!("no position to sell on {}", decision.pair);
                    notes.push(reason.clone());
                    decision.into_hold(&reason)
                }
            },
        };

        let execute = if decision.is_hold() {
            false
        } else if ctx.bypass_confidence || decision.confidence >= self.config.execution_threshold {
            true
        } else {
            notes.push(format!(
                "confidence {:.2} below threshold {:.2}, recording only",
                decision.confidence, self.config.execution_threshold
            ));
            false
        };

        if decision.is_hold() {
            decision.notional = 0.0;
        }

        tracing::info!(
            pair = %decision.pair,
            action = %decision.action,
            notional = decision.notional,
            confidence = decision.confidence,
            execute,
            "Risk gates applied"
        );

        GatedDecision {
            decision,
            execute,
            notes,
        }
    }

    fn size_entry(
        &self,
        mut decision: Decision,
        ctx: &GateContext<'_>,
        notes: &mut Vec<String>,
    ) -> Decision {
        let cap = self.entry_cap(ctx.available_capital);
        if decision.notional <= 0.0 || decision.notional > cap {
            notes.push(format!(
                "entry notional {:.2} replaced by cap {:.2}",
                decision.notional, cap
            ));
            decision.notional = cap;
        }

        if let Some(ev) = ctx.ev {
            if decision.stop_pct.is_none() {
                decision.stop_pct = Some(ev.stop_pct);
            }
            if decision.take_pct.is_none() {
                decision.take_pct = Some(ev.take_pct);
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Liquidity, OrderKind, RegimeFlags, TimeframeSummary, Trend};
    use chrono::{TimeZone, Utc};

    fn manager() -> RiskManager {
        RiskManager::new(RiskConfig {
            fee_pct: 0.0004,
            ..Default::default()
        })
    }

    fn decision(action: Action, notional: f64, confidence: f64) -> Decision {
        Decision {
            pair: "SOLUSDT".to_string(),
            action,
            order_kind: OrderKind::Market,
            notional,
            stop_pct: None,
            take_pct: None,
            limit_price: None,
            confidence,
            rationale: "advisory".to_string(),
            exit_flags: None,
        }
    }

    #[test]
    fn test_spread_rejection_above_ceiling() {
        let manager = manager();
        assert!(manager.spread_rejection(0.001).is_none());
        let reason = manager.spread_rejection(0.004).unwrap();
        assert_eq!(reason, "spread 0.4000% above maximum");
    }

    fn position(entry: f64) -> Position {
        Position {
            pair: "SOLUSDT".to_string(),
            entry_price: entry,
            size: 123.45,
            quantity: 123.45 / entry,
            stop_pct: Some(0.01),
            take_pct: Some(0.02),
            opened_at: None,
            entry_reliable: true,
        }
    }

    fn ctx<'a>(position: Option<&'a Position>, kill: bool) -> GateContext<'a> {
        GateContext {
            position,
            available_capital: 1000.0,
            kill_switch_active: kill,
            ev: None,
            bypass_confidence: false,
        }
    }

    fn snapshot(spread_pct: f64) -> MarketSnapshot {
        let summary = TimeframeSummary {
            interval: "5m".to_string(),
            candles: 200,
            last_close: 100.0,
            sma_fast: None,
            ema_fast: None,
            ema_slow: None,
            atr: 1.0,
            atr_pct: 0.01,
            volatility_z: 0.0,
            adx: None,
            trend: Trend::Sideways,
        };
        MarketSnapshot {
            pair: "SOLUSDT".to_string(),
            price: 100.0,
            short_candles: Vec::new(),
            long_candles: Vec::new(),
            short: summary.clone(),
            long: summary,
            liquidity: Liquidity {
                bid: 100.0,
                ask: 100.0,
                spread_pct,
                slippage_pct: 0.0002,
                quote_volume: 0.0,
            },
            built_at: Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap(),
        }
    }

    fn opportunity(p_up: f64) -> Opportunity {
        Opportunity {
            pair: "SOLUSDT".to_string(),
            p_up,
            score: 0.8,
            regime: RegimeFlags::default(),
            rationale: "scored".to_string(),
        }
    }

    #[test]
    fn test_entry_notional_capped() {
        let gated = manager().gate(decision(Action::Buy, 5_000.0, 0.9), ctx(None, false));
        assert_eq!(gated.decision.notional, 100.0);
        assert!(gated.execute);

        let gated = manager().gate(decision(Action::Buy, 0.0, 0.9), ctx(None, false));
        assert_eq!(gated.decision.notional, 100.0);

        let gated = manager().gate(decision(Action::Buy, 40.0, 0.9), ctx(None, false));
        assert_eq!(gated.decision.notional, 40.0);
    }

    #[test]
    fn test_exit_notional_is_position_size() {
        let held = position(100.0);
        let gated = manager().gate(decision(Action::Sell, 10.0, 0.9), ctx(Some(&held), false));
        assert_eq!(gated.decision.action, Action::Sell);
        assert_eq!(gated.decision.notional, held.size);
        assert!(gated.execute);
    }

    #[test]
    fn test_kill_switch_blocks_entry_not_exit() {
        let entry = manager().gate(decision(Action::Buy, 50.0, 0.95), ctx(None, true));
        assert!(entry.decision.is_hold());
        assert_eq!(entry.decision.notional, 0.0);
        assert!(!entry.execute);

        let held = position(100.0);
        let exit = manager().gate(decision(Action::Sell, 0.0, 0.95), ctx(Some(&held), true));
        assert_eq!(exit.decision.action, Action::Sell);
        assert!(exit.execute);
    }

    #[test]
    fn test_low_confidence_recorded_not_executed() {
        let gated = manager().gate(decision(Action::Buy, 50.0, 0.6), ctx(None, false));
        assert_eq!(gated.decision.action, Action::Buy);
        assert!(!gated.execute);

        let mut approved = ctx(None, false);
        approved.bypass_confidence = true;
        let gated = manager().gate(decision(Action::Buy, 50.0, 0.6), approved);
        assert!(gated.execute);
    }

    #[test]
    fn test_inconsistent_actions_become_hold() {
        let held = position(100.0);
        let buy = manager().gate(decision(Action::Buy, 50.0, 0.9), ctx(Some(&held), false));
        assert!(buy.decision.is_hold());
        assert!(buy.decision.rationale.contains("already open"));

        let sell = manager().gate(decision(Action::Sell, 50.0, 0.9), ctx(None, false));
        assert!(sell.decision.is_hold());
        assert_eq!(sell.decision.notional, 0.0);
    }

    #[test]
    fn test_hold_always_zero_notional() {
        let gated = manager().gate(decision(Action::Hold, 75.0, 0.99), ctx(None, false));
        assert!(gated.decision.is_hold());
        assert_eq!(gated.decision.notional, 0.0);
        assert!(!gated.execute);
    }

    #[test]
    fn test_screen_entry_kill_switch() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let mut state = RiskState::new(1000.0, now);
        state.record_close(-25.0, now);

        match manager().screen_entry(&state, &opportunity(0.9), &snapshot(0.0001)) {
            EntryScreen::Hold(d) => {
                assert!(d.is_hold());
                assert!(d.rationale.contains("kill switch"));
            }
            other => panic!("expected hold, got {:?}", other),
        }
    }

    #[test]
    fn test_screen_entry_ev_gate() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let state = RiskState::new(1000.0, now);

        assert!(matches!(
            manager().screen_entry(&state, &opportunity(0.62), &snapshot(0.0001)),
            EntryScreen::Proceed(_)
        ));
        assert!(matches!(
            manager().screen_entry(&state, &opportunity(0.35), &snapshot(0.0001)),
            EntryScreen::Hold(_)
        ));
        // Wide spread refuses even a confident entry
        assert!(matches!(
            manager().screen_entry(&state, &opportunity(0.9), &snapshot(0.01)),
            EntryScreen::Hold(_)
        ));
    }

    #[test]
    fn test_protective_exit() {
        let held = position(100.0);
        let manager = manager();

        assert!(manager.protective_exit(&held, 99.5).is_none());

        let stop = manager.protective_exit(&held, 98.9).unwrap();
        assert_eq!(stop.action, Action::Sell);
        assert_eq!(stop.notional, held.size);
        assert_eq!(stop.confidence, 1.0);

        let take = manager.protective_exit(&held, 102.5).unwrap();
        assert!(take.rationale.contains("take profit"));

        let unknown = Position {
            entry_reliable: false,
            entry_price: 0.0,
            ..held
        };
        assert!(manager.protective_exit(&unknown, 50.0).is_none());
    }
}
