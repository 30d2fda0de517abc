use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::advisory::{AdvisoryApi, AdvisoryGateway, RiskContext};
use crate::config::Settings;
use crate::engine::events::{abandoned, CycleEvent, CycleOutcome, CycleStream, Stage};
use crate::engine::state::{EngineState, SharedState};
use crate::engine::{OperatingMode, TriggerSource};
use crate::error::EngineError;
use crate::exchange::ExchangeApi;
use crate::execution::{ExecutionRecorder, ExecutionReport};
use crate::ledger::LedgerStore;
use crate::models::{Action, Decision, Position};
use crate::persistence::RiskStateStore;
use crate::reconcile::Reconciler;
use crate::risk::{EntryScreen, EvAssessment, GateContext, RiskManager, RiskState};
use crate::selection::{OpportunitySelector, ScanFailure, Selection};
use crate::snapshot::SnapshotBuilder;
use crate::Result;

/// External collaborators the engine is wired to
pub struct EngineDeps {
    pub exchange: Arc<dyn ExchangeApi>,
    pub advisory: Arc<dyn AdvisoryApi>,
    pub ledger: Arc<dyn LedgerStore>,
    pub store: Option<Arc<dyn RiskStateStore>>,
}

/// Point-in-time view for the operator surface
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: OperatingMode,
    pub position: Option<Position>,
    pub available_capital: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub kill_switch_active: bool,
    pub anomaly: Option<Vec<String>>,
    pub cooldowns: Vec<(String, DateTime<Utc>)>,
    pub manual_stage: Stage,
    pub autonomous_stage: Stage,
    pub last_reconciled: Option<DateTime<Utc>>,
}

struct SourceSlot {
    in_flight: AtomicBool,
    stage: StdMutex<Stage>,
    abandon: StdMutex<Option<Arc<watch::Sender<bool>>>>,
}

impl SourceSlot {
    fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            stage: StdMutex::new(Stage::Idle),
            abandon: StdMutex::new(None),
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a cycle saw after reconciling; fixed for the rest of the cycle
struct CycleView {
    source: TriggerSource,
    execute: bool,
    position: Option<Position>,
    risk: RiskState,
    kill_switch: bool,
    now: DateTime<Utc>,
}

/// A decision ready for the gates, with the price it was planned at
struct Planned {
    decision: Decision,
    price: f64,
    ev: Option<EvAssessment>,
    failures: Vec<ScanFailure>,
}

/// Clears the source's in-flight flag when the cycle ends
struct InFlight {
    inner: Arc<Inner>,
    source: TriggerSource,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let slot = self.inner.slot(self.source);
        *lock(&slot.abandon) = None;
        slot.in_flight.store(false, Ordering::SeqCst);
    }
}

async fn abandonable<T, F>(abandon: &mut watch::Receiver<bool>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = abandoned(abandon) => Err(EngineError::Abandoned),
        result = fut => result,
    }
}

struct Inner {
    exchange: Arc<dyn ExchangeApi>,
    selector: OpportunitySelector,
    gateway: AdvisoryGateway,
    risk: RiskManager,
    recorder: ExecutionRecorder,
    store: Option<Arc<dyn RiskStateStore>>,
    state: SharedState,
    mode: StdMutex<OperatingMode>,
    cycle_gate: RwLock<()>,
    exec_lock: Mutex<()>,
    manual: SourceSlot,
    autonomous: SourceSlot,
}

/// Runs decision cycles for both trigger sources
///
/// One cycle per source at a time. While flat, manual and autonomous cycles
/// may overlap; once a position exists they are mutually exclusive. All
/// order submission and ledger writes go through one execution lock.
#[derive(Clone)]
pub struct EngineController {
    inner: Arc<Inner>,
}

impl EngineController {
    pub fn new(settings: &Settings, deps: EngineDeps) -> Self {
        let now = Utc::now();
        let state: SharedState = Arc::new(RwLock::new(EngineState::new(RiskState::new(
            settings.risk.initial_capital,
            now,
        ))));

        let gateway = AdvisoryGateway::new(deps.advisory, &settings.advisory);
        let builder = Arc::new(SnapshotBuilder::new(
            deps.exchange.clone(),
            &settings.trading,
            &settings.execution,
        ));
        let selector = OpportunitySelector::new(
            builder,
            gateway.clone(),
            settings.trading.pairs.clone(),
            settings.trading.min_opportunity_score,
            settings.risk.cooldown(),
        );
        let reconciler = Arc::new(Reconciler::new(
            deps.exchange.clone(),
            deps.ledger.clone(),
            settings.trading.pairs.clone(),
            settings.exchange.quote_asset.clone(),
            settings.execution.dust_threshold,
        ));
        let recorder = ExecutionRecorder::new(
            deps.exchange.clone(),
            deps.ledger,
            reconciler,
            state.clone(),
            deps.store.clone(),
            settings.execution.min_notional,
        );

        Self {
            inner: Arc::new(Inner {
                exchange: deps.exchange,
                selector,
                gateway,
                risk: RiskManager::new(settings.risk.clone()),
                recorder,
                store: deps.store,
                state,
                mode: StdMutex::new(settings.trading.mode),
                cycle_gate: RwLock::new(()),
                exec_lock: Mutex::new(()),
                manual: SourceSlot::new(),
                autonomous: SourceSlot::new(),
            }),
        }
    }

    /// Restore persisted risk state, re-derive daily PnL and sync the position
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;

        if let Some(store) = &inner.store {
            match store.load().await {
                Ok(Some(mut restored)) => {
                    let mut state = inner.state.write().await;
                    restored.initial_capital = state.risk.initial_capital;
                    state.risk = restored;
                }
                Ok(None) => tracing::info!("No persisted risk state, starting fresh"),
                Err(e) => tracing::warn!(error = %e, "Failed to load risk state, starting fresh"),
            }
        }

        inner.recorder.rederive_daily_pnl().await?;

        match inner.recorder.resync().await {
            Ok(Some(position)) => tracing::info!(
                pair = %position.pair,
                entry = position.entry_price,
                size = position.size,
                "Open position recovered"
            ),
            Ok(None) => tracing::info!("No open position"),
            Err(EngineError::MultiplePositionsDetected(pairs)) => {
                tracing::error!(pairs = ?pairs, "Multiple positions held, manual intervention required")
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    pub fn state(&self) -> &SharedState {
        &self.inner.state
    }

    pub fn mode(&self) -> OperatingMode {
        *lock(&self.inner.mode)
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        let previous = std::mem::replace(&mut *lock(&self.inner.mode), mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Operating mode changed");
        }
    }

    pub fn is_in_flight(&self, source: TriggerSource) -> bool {
        self.inner.slot(source).in_flight.load(Ordering::SeqCst)
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.inner.exchange.ping().await?)
    }

    pub async fn kill_switch_active(&self) -> bool {
        let state = self.inner.state.read().await;
        self.inner.risk.kill_switch_active(&state.risk)
    }

    pub async fn has_position(&self) -> bool {
        self.inner.state.read().await.position.is_some()
    }

    /// Start a cycle and stream its progress
    ///
    /// With `execute == false` the cycle stops after GATING and returns the
    /// gated decision without touching the exchange or the ledger.
    pub fn run_cycle(&self, source: TriggerSource, execute: bool) -> Result<CycleStream> {
        let guard = self.claim(source)?;

        let (tx, rx) = mpsc::channel(32);
        let (abandon_tx, abandon_rx) = watch::channel(false);
        let abandon_tx = Arc::new(abandon_tx);
        *lock(&self.inner.slot(source).abandon) = Some(abandon_tx.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let event = match inner.cycle(source, execute, &tx, abandon_rx).await {
                Ok(outcome) => {
                    inner.set_stage(source, Stage::Done);
                    tracing::info!(
                        source = %source,
                        pair = %outcome.decision.pair,
                        action = %outcome.decision.action,
                        executed = outcome.executed,
                        "Cycle complete"
                    );
                    CycleEvent::Done(Box::new(outcome))
                }
                Err(e) => {
                    inner.set_stage(source, Stage::Error);
                    match &e {
                        EngineError::Abandoned => tracing::info!(source = %source, "Cycle abandoned"),
                        _ => tracing::error!(source = %source, error = %e, "Cycle failed"),
                    }
                    CycleEvent::Failed(e)
                }
            };
            drop(guard);
            let _ = tx.send(event).await;
        });

        Ok(CycleStream::new(rx, abandon_tx))
    }

    /// Abandon the source's in-flight cycle if it has not reached EXECUTING
    pub fn abandon(&self, source: TriggerSource) -> bool {
        match lock(&self.inner.slot(source).abandon).as_ref() {
            Some(sender) => {
                sender.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Execute an operator-approved decision
    ///
    /// Skips the confidence threshold and the EV estimate, which needs an
    /// advisory probability the operator does not supply. Position
    /// consistency, the kill switch, sizing and the spread ceiling on
    /// entries still apply.
    pub async fn execute_decision(&self, decision: Decision) -> Result<CycleOutcome> {
        let _guard = self.claim(TriggerSource::Manual)?;
        let inner = &self.inner;
        let _gate = inner.cycle_gate.write().await;

        inner.set_stage(TriggerSource::Manual, Stage::Executing);
        let result = async {
            let position = inner.recorder.resync().await?;
            let ticker = inner.exchange.book_ticker(&decision.pair).await?;
            let price = ticker.mid();

            let mut notes = Vec::new();
            let decision = match inner.risk.spread_rejection(ticker.spread_pct()) {
                Some(reason) if decision.action == Action::Buy => {
                    tracing::info!(pair = %decision.pair, "Operator entry refused: {}", reason);
                    notes.push(reason.clone());
                    decision.into_hold(&reason)
                }
                _ => decision,
            };

            let _exec = inner.exec_lock.lock().await;
            let gated = {
                let state = inner.state.read().await;
                inner.risk.gate(
                    decision,
                    GateContext {
                        position: position.as_ref(),
                        available_capital: state.risk.available_capital,
                        kill_switch_active: inner.risk.kill_switch_active(&state.risk),
                        ev: None,
                        bypass_confidence: true,
                    },
                )
            };

            let mut outcome = CycleOutcome::new(TriggerSource::Manual, gated.decision.clone());
            notes.extend(gated.notes);
            outcome.notes = notes;
            if gated.execute {
                let report = inner.recorder.execute(&gated.decision, price).await?;
                outcome.executed = report.is_some();
                outcome.report = report;
            }
            Ok::<_, EngineError>(outcome)
        }
        .await;

        inner.set_stage(
            TriggerSource::Manual,
            if result.is_ok() { Stage::Done } else { Stage::Error },
        );
        result
    }

    /// Sell the free balance of `pair`, even while an anomaly is flagged
    pub async fn force_close(&self, pair: &str) -> Result<ExecutionReport> {
        let _guard = self.claim(TriggerSource::Manual)?;
        let inner = &self.inner;
        let _gate = inner.cycle_gate.write().await;
        let _exec = inner.exec_lock.lock().await;

        tracing::warn!(pair, "Operator force close");
        inner.recorder.force_close(pair).await
    }

    /// Clear daily PnL and the cooldown table
    pub async fn reset(&self) {
        {
            let mut state = self.inner.state.write().await;
            state.risk.reset(Utc::now());
        }
        self.inner.recorder.persist_state().await;
        tracing::info!("Risk state reset by operator");
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.inner.state.read().await;
        let mut cooldowns: Vec<(String, DateTime<Utc>)> = state
            .risk
            .last_analyzed
            .iter()
            .map(|(pair, at)| (pair.clone(), *at))
            .collect();
        cooldowns.sort();

        EngineStatus {
            mode: self.mode(),
            position: state.position.clone(),
            available_capital: state.risk.available_capital,
            daily_pnl: state.risk.daily_pnl,
            daily_pnl_pct: state.risk.daily_pnl_pct(),
            kill_switch_active: self.inner.risk.kill_switch_active(&state.risk),
            anomaly: state.anomaly.clone(),
            cooldowns,
            manual_stage: *lock(&self.inner.manual.stage),
            autonomous_stage: *lock(&self.inner.autonomous.stage),
            last_reconciled: state.last_reconciled,
        }
    }

    fn claim(&self, source: TriggerSource) -> Result<InFlight> {
        let slot = self.inner.slot(source);
        if slot
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::CycleInFlight(source));
        }
        Ok(InFlight {
            inner: self.inner.clone(),
            source,
        })
    }
}

impl Inner {
    fn slot(&self, source: TriggerSource) -> &SourceSlot {
        match source {
            TriggerSource::Manual => &self.manual,
            TriggerSource::Autonomous => &self.autonomous,
        }
    }

    fn set_stage(&self, source: TriggerSource, stage: Stage) {
        *lock(&self.slot(source).stage) = stage;
    }

    async fn enter(
        &self,
        source: TriggerSource,
        tx: &mpsc::Sender<CycleEvent>,
        stage: Stage,
        message: String,
    ) {
        self.set_stage(source, stage);
        tracing::info!(source = %source, stage = %stage, "{}", message);
        let _ = tx.send(CycleEvent::Progress { stage, message }).await;
    }

    async fn stamp_analysis(&self, pair: &str, now: DateTime<Utc>) {
        {
            let mut state = self.state.write().await;
            state.risk.record_analysis(pair, now);
        }
        self.recorder.persist_state().await;
    }

    async fn cycle(
        &self,
        source: TriggerSource,
        execute: bool,
        tx: &mpsc::Sender<CycleEvent>,
        mut abandon: watch::Receiver<bool>,
    ) -> Result<CycleOutcome> {
        // Read guard while flat, write guard once a position exists
        let holding = self.state.read().await.position.is_some();
        let (_shared, _exclusive) = abandonable(&mut abandon, async {
            Ok(if holding {
                (None, Some(self.cycle_gate.write().await))
            } else {
                (Some(self.cycle_gate.read().await), None)
            })
        })
        .await?;

        self.enter(source, tx, Stage::Scanning, "reconciling position".to_string())
            .await;
        let position = abandonable(&mut abandon, self.recorder.resync()).await?;

        let view = {
            let state = self.state.read().await;
            CycleView {
                source,
                execute,
                position,
                risk: state.risk.clone(),
                kill_switch: self.risk.kill_switch_active(&state.risk),
                now: Utc::now(),
            }
        };

        if view.position.is_none() && view.kill_switch {
            let reason = EngineError::KillSwitchActive {
                daily_pnl_pct: view.risk.daily_pnl_pct() * 100.0,
            };
            tracing::info!(source = %source, "{}", reason);
            return Ok(CycleOutcome::new(source, Decision::no_op(reason.to_string())));
        }

        // Stops and targets only need a price, not a score
        if let Some(held) = &view.position {
            let price = abandonable(&mut abandon, async {
                self.exchange
                    .price(&held.pair)
                    .await
                    .map_err(EngineError::from)
            })
            .await?;
            if let Some(exit) = self.risk.protective_exit(held, price) {
                self.enter(
                    source,
                    tx,
                    Stage::Advising,
                    format!("protective exit for {} at {}", held.pair, price),
                )
                .await;
                let planned = Planned {
                    decision: exit,
                    price,
                    ev: None,
                    failures: Vec::new(),
                };
                return self.conclude(&view, tx, &mut abandon, planned).await;
            }
        }

        let scan_message = match &view.position {
            Some(p) => format!("analyzing held position {}", p.pair),
            None => "scanning eligible pairs".to_string(),
        };
        self.enter(source, tx, Stage::Scanning, scan_message).await;
        let (selection, failures) = abandonable(
            &mut abandon,
            self.selector.select(&view.risk, view.position.as_ref(), view.now),
        )
        .await?;

        let (opportunity, snapshot) = match selection {
            Selection::NoOp(decision) => {
                let mut outcome = CycleOutcome::new(source, decision);
                outcome.failures = failures;
                return Ok(outcome);
            }
            Selection::Manage {
                opportunity,
                snapshot,
            }
            | Selection::Candidate {
                opportunity,
                snapshot,
            } => (opportunity, snapshot),
        };
        let pair = opportunity.pair.clone();
        let assessment = self.risk.assess(&opportunity, &snapshot);

        self.enter(
            source,
            tx,
            Stage::Advising,
            format!("planning execution for {}", pair),
        )
        .await;

        let mut ev = None;
        let decision = match &view.position {
            Some(held) => {
                let context = RiskContext {
                    price: snapshot.price,
                    atr: snapshot.atr(),
                    spread_pct: snapshot.liquidity.spread_pct,
                    fees_pct: self.risk.config().fee_pct,
                    available_capital: view.risk.available_capital,
                    stop_pct: held.stop_pct.unwrap_or(assessment.stop_pct),
                    take_pct: held.take_pct.unwrap_or(assessment.take_pct),
                    position: Some(held.clone()),
                };
                abandonable(
                    &mut abandon,
                    self.gateway.plan_execution(&opportunity, &context),
                )
                .await?
            }
            None => match self.risk.screen_entry(&view.risk, &opportunity, &snapshot) {
                EntryScreen::Hold(decision) => {
                    self.stamp_analysis(&pair, view.now).await;
                    let mut outcome = CycleOutcome::new(source, decision);
                    outcome.ev = Some(assessment);
                    outcome.failures = failures;
                    return Ok(outcome);
                }
                EntryScreen::Proceed(passed) => {
                    ev = Some(passed);
                    let context = RiskContext {
                        price: snapshot.price,
                        atr: snapshot.atr(),
                        spread_pct: snapshot.liquidity.spread_pct,
                        fees_pct: self.risk.config().fee_pct,
                        available_capital: view.risk.available_capital,
                        stop_pct: passed.stop_pct,
                        take_pct: passed.take_pct,
                        position: None,
                    };
                    abandonable(
                        &mut abandon,
                        self.gateway.plan_execution(&opportunity, &context),
                    )
                    .await?
                }
            },
        };

        let planned = Planned {
            decision,
            price: snapshot.price,
            ev,
            failures,
        };
        self.conclude(&view, tx, &mut abandon, planned).await
    }

    /// GATING through EXECUTING for a planned decision
    async fn conclude(
        &self,
        view: &CycleView,
        tx: &mpsc::Sender<CycleEvent>,
        abandon: &mut watch::Receiver<bool>,
        planned: Planned,
    ) -> Result<CycleOutcome> {
        let source = view.source;
        let Planned {
            decision,
            price,
            ev,
            failures,
        } = planned;
        let pair = decision.pair.clone();

        self.enter(
            source,
            tx,
            Stage::Gating,
            format!("applying risk gates to {} {}", decision.action, pair),
        )
        .await;
        let gated = self.risk.gate(
            decision,
            GateContext {
                position: view.position.as_ref(),
                available_capital: view.risk.available_capital,
                kill_switch_active: view.kill_switch,
                ev: ev.as_ref(),
                bypass_confidence: false,
            },
        );
        self.stamp_analysis(&pair, view.now).await;

        let mut outcome = CycleOutcome::new(source, gated.decision.clone());
        outcome.ev = ev;
        outcome.notes = gated.notes;
        outcome.failures = failures;

        if !view.execute || gated.decision.is_hold() {
            return Ok(outcome);
        }

        // Last point at which the cycle may still be abandoned
        if *abandon.borrow() {
            return Err(EngineError::Abandoned);
        }

        let _exec = self.exec_lock.lock().await;

        if !gated.execute {
            self.enter(
                source,
                tx,
                Stage::Executing,
                format!("recording {} {} without execution", gated.decision.action, pair),
            )
            .await;
            outcome.logged = Some(self.recorder.log(&gated.decision, price).await?);
            return Ok(outcome);
        }

        // Another source may have opened or closed a position meanwhile
        let regated = {
            let state = self.state.read().await;
            self.risk.gate(
                gated.decision,
                GateContext {
                    position: state.position.as_ref(),
                    available_capital: state.risk.available_capital,
                    kill_switch_active: self.risk.kill_switch_active(&state.risk),
                    ev: outcome.ev.as_ref(),
                    bypass_confidence: true,
                },
            )
        };
        outcome.decision = regated.decision.clone();
        outcome.notes.extend(regated.notes);
        if regated.decision.is_hold() {
            return Ok(outcome);
        }

        self.enter(
            source,
            tx,
            Stage::Executing,
            format!(
                "submitting {} {} for {:.2}",
                regated.decision.action, pair, regated.decision.notional
            ),
        )
        .await;
        let report = self.recorder.execute(&regated.decision, price).await?;
        outcome.executed = report.is_some();
        outcome.report = report;

        Ok(outcome)
    }
}
