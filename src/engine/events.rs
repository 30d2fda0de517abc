use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

use crate::engine::TriggerSource;
use crate::error::EngineError;
use crate::execution::ExecutionReport;
use crate::models::{Decision, TradeRecord};
use crate::risk::EvAssessment;
use crate::selection::ScanFailure;

/// Cycle stages, in order. `Error` can follow any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Idle,
    Scanning,
    Advising,
    Gating,
    Executing,
    Done,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "IDLE",
            Stage::Scanning => "SCANNING",
            Stage::Advising => "ADVISING",
            Stage::Gating => "GATING",
            Stage::Executing => "EXECUTING",
            Stage::Done => "DONE",
            Stage::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Terminal result of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub source: TriggerSource,
    pub decision: Decision,
    /// True when an order was sent and filled
    pub executed: bool,
    pub report: Option<ExecutionReport>,
    /// Ledger entry for a decision recorded without execution
    pub logged: Option<TradeRecord>,
    pub ev: Option<EvAssessment>,
    pub notes: Vec<String>,
    pub failures: Vec<ScanFailure>,
}

impl CycleOutcome {
    pub fn new(source: TriggerSource, decision: Decision) -> Self {
        Self {
            source,
            decision,
            executed: false,
            report: None,
            logged: None,
            ev: None,
            notes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CycleEvent {
    Progress { stage: Stage, message: String },
    Done(Box<CycleOutcome>),
    Failed(EngineError),
}

impl CycleEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CycleEvent::Progress { .. })
    }
}

/// Progress events of one cycle, ending in exactly one terminal event
///
/// Not restartable. Dropping the stream before the cycle reaches
/// EXECUTING abandons it; after that the cycle runs to completion.
pub struct CycleStream {
    rx: mpsc::Receiver<CycleEvent>,
    abandon: Arc<watch::Sender<bool>>,
    finished: bool,
}

impl CycleStream {
    pub(crate) fn new(rx: mpsc::Receiver<CycleEvent>, abandon: Arc<watch::Sender<bool>>) -> Self {
        Self {
            rx,
            abandon,
            finished: false,
        }
    }

    /// Drain progress events and return the terminal result
    pub async fn outcome(mut self) -> Result<CycleOutcome, EngineError> {
        while let Some(event) = self.rx.recv().await {
            match event {
                CycleEvent::Progress { stage, message } => {
                    tracing::debug!(stage = %stage, "{}", message);
                }
                CycleEvent::Done(outcome) => {
                    self.finished = true;
                    return Ok(*outcome);
                }
                CycleEvent::Failed(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }
        }
        self.finished = true;
        Err(EngineError::Abandoned)
    }
}

impl Stream for CycleStream {
    type Item = CycleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CycleStream {
    fn drop(&mut self) {
        if !self.finished {
            self.abandon.send_replace(true);
        }
    }
}

/// Resolves once the cycle has been abandoned
pub(crate) async fn abandoned(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
