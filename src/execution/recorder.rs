use chrono::Utc;
use std::sync::Arc;

use crate::error::EngineError;
use crate::exchange::{ExchangeApi, ExchangeError, OrderAck, OrderRequest, OrderSide};
use crate::ledger::LedgerStore;
use crate::models::{Action, Decision, NewTradeRecord, OrderKind, Position, TradeRecord, TradeStatus};
use crate::engine::state::SharedState;
use crate::persistence::RiskStateStore;
use crate::reconcile::Reconciler;
use crate::Result;

/// Confirmed fill written to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub record: TradeRecord,
    pub realized_pnl: f64,
    /// Position after resync, None when flat or resync failed
    pub position: Option<Position>,
    pub warnings: Vec<String>,
}

/// Submits orders and appends the resulting ledger records
///
/// The only component that writes the position or the risk state after a
/// fill. Callers serialize access (the controller's execution lock).
pub struct ExecutionRecorder {
    exchange: Arc<dyn ExchangeApi>,
    ledger: Arc<dyn LedgerStore>,
    reconciler: Arc<Reconciler>,
    state: SharedState,
    store: Option<Arc<dyn RiskStateStore>>,
    min_notional: f64,
}

impl ExecutionRecorder {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        ledger: Arc<dyn LedgerStore>,
        reconciler: Arc<Reconciler>,
        state: SharedState,
        store: Option<Arc<dyn RiskStateStore>>,
        min_notional: f64,
    ) -> Self {
        Self {
            exchange,
            ledger,
            reconciler,
            state,
            store,
            min_notional,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    /// Re-derive the position from exchange balances and the ledger
    ///
    /// `MultiplePositionsDetected` is stored as the anomaly and returned.
    pub async fn resync(&self) -> Result<Option<Position>> {
        let result = self.reconciler.reconcile().await;
        let now = Utc::now();

        let mut state = self.state.write().await;
        match result {
            Ok(reconciliation) => {
                state.position = reconciliation.position.clone();
                state.anomaly = None;
                state.last_reconciled = Some(now);
                state.risk.set_available_capital(reconciliation.quote_free);
                state.risk.roll_day(now);
                let snapshot = state.risk.clone();
                drop(state);
                self.persist(&snapshot).await;
                Ok(reconciliation.position)
            }
            Err(EngineError::MultiplePositionsDetected(pairs)) => {
                tracing::error!(pairs = ?pairs, "Multiple positions detected, entries halted");
                state.position = None;
                state.anomaly = Some(pairs.clone());
                state.last_reconciled = Some(now);
                Err(EngineError::MultiplePositionsDetected(pairs))
            }
            Err(e) => Err(e),
        }
    }

    /// Restore daily PnL from the ledger after a restart
    pub async fn rederive_daily_pnl(&self) -> Result<()> {
        let history = self.ledger.history().await?;
        let mut state = self.state.write().await;
        state.risk.rederive_daily_pnl(&history, Utc::now());
        tracing::info!(daily_pnl = state.risk.daily_pnl, "Daily PnL re-derived from ledger");
        Ok(())
    }

    /// Record a decision that was not sent to the exchange
    pub async fn log(&self, decision: &Decision, reference_price: f64) -> Result<TradeRecord> {
        let record = self
            .ledger
            .append(NewTradeRecord {
                pair: decision.pair.clone(),
                action: decision.action,
                price: reference_price,
                notional: decision.notional,
                quantity: 0.0,
                realized_pnl: 0.0,
                rationale: decision.rationale.clone(),
                status: TradeStatus::Logged,
                order_id: None,
                stop_pct: decision.stop_pct,
                take_pct: decision.take_pct,
            })
            .await?;

        tracing::info!(
            pair = %record.pair,
            action = %record.action,
            confidence = decision.confidence,
            "Decision logged without execution"
        );
        Ok(record)
    }

    /// Submit the decision's order and record the outcome
    ///
    /// Returns Ok(None) for HOLD. Every submission attempt leaves exactly one
    /// ledger record: Open, Closed, or Failed.
    pub async fn execute(
        &self,
        decision: &Decision,
        reference_price: f64,
    ) -> Result<Option<ExecutionReport>> {
        let held = self.state.read().await.position.clone();
        self.submit(decision, reference_price, held).await
    }

    /// Sell the full free balance of `pair`, regardless of anomalies
    ///
    /// The position is derived here and handed to the submission directly;
    /// shared state only changes through the post-fill resync.
    pub async fn force_close(&self, pair: &str) -> Result<ExecutionReport> {
        // Use the freshest view we can get; an anomaly still lets us close
        let position = match self.resync().await {
            Ok(Some(position)) if position.pair == pair => Some(position),
            Ok(_) => None,
            Err(EngineError::MultiplePositionsDetected(_)) => {
                self.position_for(pair).await?
            }
            Err(e) => return Err(e),
        };

        let position = position.ok_or_else(|| EngineError::NoPosition(pair.to_string()))?;
        let price = self.exchange.price(pair).await?;

        let decision = Decision {
            pair: pair.to_string(),
            action: Action::Sell,
            order_kind: OrderKind::Market,
            notional: position.size,
            stop_pct: position.stop_pct,
            take_pct: position.take_pct,
            limit_price: None,
            confidence: 1.0,
            rationale: "operator force close".to_string(),
            exit_flags: None,
        };

        self.submit(&decision, price, Some(position))
            .await?
            .ok_or_else(|| EngineError::NoPosition(pair.to_string()))
    }

    async fn submit(
        &self,
        decision: &Decision,
        reference_price: f64,
        position: Option<Position>,
    ) -> Result<Option<ExecutionReport>> {
        if decision.is_hold() {
            return Ok(None);
        }

        if decision.notional < self.min_notional {
            let err = EngineError::OrderTooSmall {
                notional: decision.notional,
                minimum: self.min_notional,
            };
            self.append_failed(decision, reference_price, &err.to_string())
                .await?;
            return Err(err);
        }

        let held = position.filter(|p| p.pair == decision.pair);
        let order = match decision.action {
            Action::Buy => self.entry_order(decision),
            Action::Sell => {
                let Some(held) = held.as_ref() else {
                    return Err(EngineError::NoPosition(decision.pair.clone()));
                };
                let quantity = self.sellable_quantity(held).await?;
                if quantity <= 0.0 {
                    let err = EngineError::OrderRejected(format!(
                        "no free {} balance to sell",
                        held.pair
                    ));
                    self.append_failed(decision, reference_price, &err.to_string())
                        .await?;
                    return Err(err);
                }
                self.exit_order(decision, quantity)
            }
            Action::Hold => return Ok(None),
        };

        tracing::info!(
            pair = %decision.pair,
            action = %decision.action,
            notional = decision.notional,
            "Executing order"
        );

        let ack = match self.exchange.create_order(&order).await {
            Ok(ack) if ack.order_id.is_some() => ack,
            Ok(_) => {
                let err = EngineError::OrderRejected("acknowledgement without order id".into());
                self.append_failed(decision, reference_price, &err.to_string())
                    .await?;
                return Err(err);
            }
            Err(e) => {
                let err = match &e {
                    ExchangeError::Rejected { .. } => EngineError::OrderRejected(e.to_string()),
                    _ => EngineError::Exchange(e.to_string()),
                };
                tracing::error!(pair = %decision.pair, error = %e, "Order failed");
                self.append_failed(decision, reference_price, &err.to_string())
                    .await?;
                return Err(err);
            }
        };

        let fill_price = ack
            .average_price()
            .or(decision.limit_price)
            .unwrap_or(reference_price);

        match (decision.action, held) {
            (Action::Sell, Some(held)) => {
                let quantity = order.quantity.unwrap_or(held.quantity);
                self.record_exit(decision, &held, quantity, &ack, fill_price)
                    .await
                    .map(Some)
            }
            (Action::Sell, None) => Err(EngineError::NoPosition(decision.pair.clone())),
            _ => self.record_entry(decision, &ack, fill_price).await.map(Some),
        }
    }

    /// Base quantity that can be sold now: the held quantity capped at the
    /// free balance, since locked funds back open orders
    async fn sellable_quantity(&self, held: &Position) -> Result<f64> {
        let base = crate::exchange::base_asset(&held.pair, self.reconciler.quote_asset());
        let free = self
            .exchange
            .balances()
            .await?
            .into_iter()
            .find(|b| b.asset == base)
            .map(|b| b.free)
            .unwrap_or(0.0);

        if free < held.quantity {
            tracing::warn!(
                pair = %held.pair,
                held = held.quantity,
                free,
                "Part of the position is locked, selling the free balance only"
            );
        }
        Ok(held.quantity.min(free))
    }

    /// Build a position for one pair directly from balances and ledger
    async fn position_for(&self, pair: &str) -> Result<Option<Position>> {
        let quote = self.reconciler.quote_asset().to_string();
        let base = crate::exchange::base_asset(pair, &quote).to_string();
        let balances = self.exchange.balances().await?;
        let Some(balance) = balances.into_iter().find(|b| b.asset == base) else {
            return Ok(None);
        };
        let price = self.exchange.price(pair).await?;
        let history = self.ledger.history_for(pair).await?;
        let prices = std::collections::HashMap::from([(pair.to_string(), price)]);

        let reconciliation =
            crate::reconcile::reconcile(&[balance], &history, &prices, &quote, 0.0)?;
        Ok(reconciliation.position)
    }

    fn entry_order(&self, decision: &Decision) -> OrderRequest {
        match (decision.order_kind, decision.limit_price) {
            (OrderKind::Limit, Some(price)) if price > 0.0 => OrderRequest {
                symbol: decision.pair.clone(),
                side: OrderSide::Buy,
                kind: OrderKind::Limit,
                quantity: Some(decision.notional / price),
                quote_notional: None,
                price: Some(price),
            },
            _ => OrderRequest {
                symbol: decision.pair.clone(),
                side: OrderSide::Buy,
                kind: OrderKind::Market,
                quantity: None,
                quote_notional: Some(decision.notional),
                price: None,
            },
        }
    }

    fn exit_order(&self, decision: &Decision, quantity: f64) -> OrderRequest {
        let (kind, price) = match (decision.order_kind, decision.limit_price) {
            (OrderKind::Limit, Some(price)) if price > 0.0 => (OrderKind::Limit, Some(price)),
            _ => (OrderKind::Market, None),
        };

        OrderRequest {
            symbol: decision.pair.clone(),
            side: OrderSide::Sell,
            kind,
            quantity: Some(quantity),
            quote_notional: None,
            price,
        }
    }

    async fn record_entry(
        &self,
        decision: &Decision,
        ack: &OrderAck,
        fill_price: f64,
    ) -> Result<ExecutionReport> {
        let notional = if ack.quote_qty > 0.0 {
            ack.quote_qty
        } else {
            decision.notional
        };
        let quantity = if ack.executed_qty > 0.0 {
            ack.executed_qty
        } else if fill_price > 0.0 {
            notional / fill_price
        } else {
            0.0
        };

        let record = self
            .ledger
            .append(NewTradeRecord {
                pair: decision.pair.clone(),
                action: Action::Buy,
                price: fill_price,
                notional,
                quantity,
                realized_pnl: 0.0,
                rationale: decision.rationale.clone(),
                status: TradeStatus::Open,
                order_id: ack.order_id.clone(),
                stop_pct: decision.stop_pct,
                take_pct: decision.take_pct,
            })
            .await?;

        tracing::info!(
            pair = %record.pair,
            price = fill_price,
            notional,
            order_id = ?record.order_id,
            "Entry filled"
        );

        self.after_fill(record, 0.0, Vec::new()).await
    }

    async fn record_exit(
        &self,
        decision: &Decision,
        held: &Position,
        submitted_qty: f64,
        ack: &OrderAck,
        fill_price: f64,
    ) -> Result<ExecutionReport> {
        let quantity = if ack.executed_qty > 0.0 {
            ack.executed_qty
        } else {
            submitted_qty
        };
        let notional = if ack.quote_qty > 0.0 {
            ack.quote_qty
        } else {
            fill_price * quantity
        };

        let mut warnings = Vec::new();
        let realized_pnl = if held.entry_reliable {
            (fill_price - held.entry_price) * quantity
        } else {
            let warning = format!(
                "entry price for {} unknown, realized PnL recorded as 0",
                held.pair
            );
            tracing::warn!("{}", warning);
            warnings.push(warning);
            0.0
        };

        let record = self
            .ledger
            .append(NewTradeRecord {
                pair: decision.pair.clone(),
                action: Action::Sell,
                price: fill_price,
                notional,
                quantity,
                realized_pnl,
                rationale: decision.rationale.clone(),
                status: TradeStatus::Closed,
                order_id: ack.order_id.clone(),
                stop_pct: held.stop_pct,
                take_pct: held.take_pct,
            })
            .await?;

        tracing::info!(
            pair = %record.pair,
            price = fill_price,
            realized_pnl,
            order_id = ?record.order_id,
            "Exit filled"
        );

        {
            let mut state = self.state.write().await;
            state.risk.record_close(realized_pnl, Utc::now());
        }

        self.after_fill(record, realized_pnl, warnings).await
    }

    async fn after_fill(
        &self,
        record: TradeRecord,
        realized_pnl: f64,
        mut warnings: Vec<String>,
    ) -> Result<ExecutionReport> {
        let position = match self.resync().await {
            Ok(position) => position,
            Err(e) => {
                // The fill is recorded; the next cycle re-derives the position
                let warning = format!("post-fill reconciliation failed: {}", e);
                tracing::warn!("{}", warning);
                warnings.push(warning);
                let risk = self.state.read().await.risk.clone();
                self.persist(&risk).await;
                None
            }
        };

        Ok(ExecutionReport {
            record,
            realized_pnl,
            position,
            warnings,
        })
    }

    async fn append_failed(
        &self,
        decision: &Decision,
        price: f64,
        reason: &str,
    ) -> Result<TradeRecord> {
        let rationale = if decision.rationale.is_empty() {
            reason.to_string()
        } else {
            format!("{} [{}]", decision.rationale, reason)
        };

        self.ledger
            .append(NewTradeRecord {
                pair: decision.pair.clone(),
                action: decision.action,
                price,
                notional: decision.notional,
                quantity: 0.0,
                realized_pnl: 0.0,
                rationale,
                status: TradeStatus::Failed,
                order_id: None,
                stop_pct: decision.stop_pct,
                take_pct: decision.take_pct,
            })
            .await
    }

    async fn persist(&self, risk: &crate::risk::RiskState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(risk).await {
                tracing::warn!(error = %e, "Failed to persist risk state");
            }
        }
    }

    /// Persist the current risk state, e.g. after an analysis stamp or reset
    pub async fn persist_state(&self) {
        let risk = self.state.read().await.risk.clone();
        self.persist(&risk).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fakes::{FakeExchange, OrderScript};
    use crate::engine::state::EngineState;
    use crate::ledger::MemoryLedger;
    use crate::risk::RiskState;
    use tokio::sync::RwLock;

    struct Harness {
        exchange: Arc<FakeExchange>,
        ledger: Arc<MemoryLedger>,
        recorder: ExecutionRecorder,
    }

    fn harness(exchange: FakeExchange) -> Harness {
        let exchange = Arc::new(exchange);
        let ledger = Arc::new(MemoryLedger::new());
        let reconciler = Arc::new(Reconciler::new(
            exchange.clone(),
            ledger.clone(),
            vec!["SOLUSDT".to_string(), "ETHUSDT".to_string()],
            "USDT".to_string(),
            1.0,
        ));
        let state = Arc::new(RwLock::new(EngineState::new(RiskState::new(
            1000.0,
            Utc::now(),
        ))));
        let recorder = ExecutionRecorder::new(
            exchange.clone(),
            ledger.clone(),
            reconciler,
            state,
            None,
            5.0,
        );
        Harness {
            exchange,
            ledger,
            recorder,
        }
    }

    fn decision(action: Action, notional: f64) -> Decision {
        Decision {
            pair: "SOLUSDT".to_string(),
            action,
            order_kind: OrderKind::Market,
            notional,
            stop_pct: Some(0.02),
            take_pct: Some(0.03),
            limit_price: None,
            confidence: 0.9,
            rationale: "test".to_string(),
            exit_flags: None,
        }
    }

    #[tokio::test]
    async fn test_hold_is_noop() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        let report = h
            .recorder
            .execute(&Decision::hold("SOLUSDT", "nothing"), 100.0)
            .await
            .unwrap();

        assert!(report.is_none());
        assert!(h.ledger.is_empty().await);
        assert_eq!(h.exchange.order_count(), 0);
    }

    #[tokio::test]
    async fn test_too_small_recorded_as_failed() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        let err = h
            .recorder
            .execute(&decision(Action::Buy, 4.0), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderTooSmall { .. }));
        let history = h.ledger.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TradeStatus::Failed);
        assert_eq!(h.exchange.order_count(), 0);
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));

        let entry = h
            .recorder
            .execute(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.record.status, TradeStatus::Open);
        let position = entry.position.unwrap();
        assert_eq!(position.pair, "SOLUSDT");
        assert!((position.entry_price - 100.0).abs() < 1e-9);
        assert!((position.quantity - 1.0).abs() < 1e-9);
        assert_eq!(position.stop_pct, Some(0.02));

        {
            let state = h.recorder.state().read().await;
            assert!((state.risk.available_capital - 900.0).abs() < 1e-9);
        }

        h.exchange.set_price("SOLUSDT", 110.0);
        let exit = h
            .recorder
            .execute(&decision(Action::Sell, 100.0), 110.0)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit.record.status, TradeStatus::Closed);
        assert!((exit.realized_pnl - 10.0).abs() < 1e-9);
        assert_eq!(exit.position, None);

        let state = h.recorder.state().read().await;
        assert!((state.risk.daily_pnl - 10.0).abs() < 1e-9);
        assert_eq!(state.position, None);
    }

    #[tokio::test]
    async fn test_rejection_records_failed_without_position() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        h.exchange
            .order_script
            .lock()
            .unwrap()
            .push_back(OrderScript::Reject(ExchangeError::Rejected {
                status: 400,
                code: Some(-2010),
                message: "insufficient balance".to_string(),
            }));

        let err = h
            .recorder
            .execute(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderRejected(_)));
        let history = h.ledger.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TradeStatus::Failed);
        assert!(h.recorder.state().read().await.position.is_none());
    }

    #[tokio::test]
    async fn test_missing_order_id_is_failure() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        h.exchange
            .order_script
            .lock()
            .unwrap()
            .push_back(OrderScript::MissingId);

        let err = h
            .recorder
            .execute(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderRejected(_)));
        assert_eq!(
            h.ledger.history().await.unwrap()[0].status,
            TradeStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_sell_without_position_refused() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        let err = h
            .recorder
            .execute(&decision(Action::Sell, 50.0), 100.0)
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::NoPosition("SOLUSDT".to_string()));
        assert_eq!(h.exchange.order_count(), 0);
    }

    #[tokio::test]
    async fn test_force_close_during_anomaly() {
        let exchange = FakeExchange::new(500.0)
            .with_market("SOLUSDT", 100.0)
            .with_market("ETHUSDT", 2000.0);
        exchange.set_balance("SOL", 2.0);
        exchange.set_balance("ETH", 0.1);
        let h = harness(exchange);

        let err = h.recorder.resync().await.unwrap_err();
        assert!(matches!(err, EngineError::MultiplePositionsDetected(_)));
        assert!(h.recorder.state().read().await.anomaly.is_some());

        let report = h.recorder.force_close("SOLUSDT").await.unwrap();
        assert_eq!(report.record.status, TradeStatus::Closed);
        // No ledger history for the SOL bag, so PnL cannot be known
        assert_eq!(report.realized_pnl, 0.0);
        assert!(h.exchange.balance("SOL").abs() < 1e-9);

        // Only ETH remains, so the anomaly clears on resync
        let position = h.recorder.resync().await.unwrap().unwrap();
        assert_eq!(position.pair, "ETHUSDT");
        assert!(h.recorder.state().read().await.anomaly.is_none());
    }

    #[tokio::test]
    async fn test_rejected_force_close_leaves_state_untouched() {
        let exchange = FakeExchange::new(500.0)
            .with_market("SOLUSDT", 100.0)
            .with_market("ETHUSDT", 2000.0);
        exchange.set_balance("SOL", 2.0);
        exchange.set_balance("ETH", 0.1);
        exchange
            .order_script
            .lock()
            .unwrap()
            .push_back(OrderScript::Reject(ExchangeError::Rejected {
                status: 400,
                code: Some(-2010),
                message: "Account has insufficient balance".to_string(),
            }));
        let h = harness(exchange);

        let err = h.recorder.force_close("SOLUSDT").await.unwrap_err();
        assert!(matches!(err, EngineError::OrderRejected(_)));

        let history = h.ledger.history().await.unwrap();
        assert_eq!(history.last().unwrap().status, TradeStatus::Failed);

        let state = h.recorder.state().read().await;
        assert!(state.position.is_none());
        assert_eq!(
            state.anomaly,
            Some(vec!["ETHUSDT".to_string(), "SOLUSDT".to_string()])
        );
        drop(state);
        assert!((h.exchange.balance("SOL") - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_uses_free_balance_only() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        h.recorder
            .execute(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap()
            .unwrap();

        // A resting order holds part of the bag
        h.exchange.set_balance("SOL", 0.6);
        h.exchange.set_locked("SOL", 0.4);
        let position = h.recorder.resync().await.unwrap().unwrap();
        assert!((position.quantity - 1.0).abs() < 1e-9);

        let exit = h
            .recorder
            .execute(&decision(Action::Sell, 60.0), 100.0)
            .await
            .unwrap()
            .unwrap();

        let orders = h.exchange.orders.lock().unwrap().clone();
        let sell = orders.last().unwrap();
        assert_eq!(sell.side, OrderSide::Sell);
        assert!((sell.quantity.unwrap() - 0.6).abs() < 1e-9);
        assert!((exit.record.quantity - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_with_everything_locked_is_failed() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        h.recorder
            .execute(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap()
            .unwrap();
        h.exchange.set_balance("SOL", 0.0);
        h.exchange.set_locked("SOL", 1.0);
        h.recorder.resync().await.unwrap().unwrap();

        let err = h
            .recorder
            .execute(&decision(Action::Sell, 100.0), 100.0)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::OrderRejected(_)));
        assert_eq!(h.exchange.order_count(), 1);
        let history = h.ledger.history().await.unwrap();
        assert_eq!(history.last().unwrap().status, TradeStatus::Failed);
        assert!(h.recorder.state().read().await.position.is_some());
    }

    #[tokio::test]
    async fn test_log_writes_logged_record() {
        let h = harness(FakeExchange::new(1000.0).with_market("SOLUSDT", 100.0));
        let record = h
            .recorder
            .log(&decision(Action::Buy, 100.0), 100.0)
            .await
            .unwrap();

        assert_eq!(record.status, TradeStatus::Logged);
        assert_eq!(h.exchange.order_count(), 0);
    }
}
