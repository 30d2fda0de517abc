use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::engine::{CycleOutcome, EngineController, OperatingMode, TriggerSource};
use crate::error::EngineError;

#[derive(Debug)]
pub enum TickOutcome {
    Skipped(String),
    Completed(Box<CycleOutcome>),
    Failed(EngineError),
}

/// Fixed-interval autonomous trigger
///
/// A tick that lands while the previous cycle is still running is skipped,
/// never queued.
pub struct Autopilot {
    controller: EngineController,
    period: Duration,
}

impl Autopilot {
    pub fn new(controller: EngineController, period: Duration) -> Self {
        Self { controller, period }
    }

    /// Run one autonomous cycle unless a suppression rule applies
    pub async fn tick(&self) -> TickOutcome {
        if self.controller.mode() != OperatingMode::Autonomous {
            return self.skip("manual mode");
        }

        if self.controller.is_in_flight(TriggerSource::Autonomous) {
            return self.skip("previous cycle still in flight");
        }

        if let Err(e) = self.controller.ping().await {
            return self.skip(&format!("exchange unreachable: {}", e));
        }

        // Exits stay possible under the kill switch, so only skip while flat
        if self.controller.kill_switch_active().await && !self.controller.has_position().await {
            return self.skip("kill switch active");
        }

        let stream = match self.controller.run_cycle(TriggerSource::Autonomous, true) {
            Ok(stream) => stream,
            Err(EngineError::CycleInFlight(_)) => {
                return self.skip("previous cycle still in flight")
            }
            Err(e) => return TickOutcome::Failed(e),
        };

        match stream.outcome().await {
            Ok(outcome) => TickOutcome::Completed(Box::new(outcome)),
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Tick until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(period_secs = self.period.as_secs(), "Autopilot started");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Autopilot stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        TickOutcome::Completed(outcome) => tracing::info!(
                            pair = %outcome.decision.pair,
                            action = %outcome.decision.action,
                            executed = outcome.executed,
                            "Autonomous cycle finished"
                        ),
                        TickOutcome::Failed(e) => {
                            tracing::error!(error = %e, "Autonomous cycle failed")
                        }
                        TickOutcome::Skipped(_) => {}
                    }
                }
            }
        }
    }

    fn skip(&self, reason: &str) -> TickOutcome {
        tracing::debug!(reason, "Autopilot tick skipped");
        TickOutcome::Skipped(reason.to_string())
    }
}
