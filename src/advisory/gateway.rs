use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::advisory::{AdvisoryApi, AdvisoryError, PlanRequest, RiskContext, ScoreRequest};
use crate::config::AdvisorySettings;
use crate::error::EngineError;
use crate::models::{Decision, MarketSnapshot, Opportunity};
use crate::Result;

/// Retrying, sanity-checking wrapper around the advisory services
///
/// Each call gets `retries + 1` attempts; attempt `n > 1` waits
/// `backoff * (n - 1)` and carries the previous error as `prior_error`.
#[derive(Clone)]
pub struct AdvisoryGateway {
    api: Arc<dyn AdvisoryApi>,
    retries: u32,
    backoff: Duration,
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl AdvisoryGateway {
    pub fn new(api: Arc<dyn AdvisoryApi>, settings: &AdvisorySettings) -> Self {
        Self::with_policy(api, settings.retries, settings.backoff())
    }

    pub fn with_policy(api: Arc<dyn AdvisoryApi>, retries: u32, backoff: Duration) -> Self {
        Self {
            api,
            retries,
            backoff,
        }
    }

    pub async fn score_opportunity(&self, snapshot: &MarketSnapshot) -> Result<Opportunity> {
        let pair = snapshot.pair.clone();
        let base = ScoreRequest {
            pair: snapshot.pair.clone(),
            short: snapshot.short.clone(),
            long: snapshot.long.clone(),
            liquidity: snapshot.liquidity.clone(),
            prior_error: None,
        };

        let mut opportunity = self
            .with_retry("score", &pair, |prior_error| {
                let request = ScoreRequest {
                    prior_error,
                    ..base.clone()
                };
                let api = self.api.clone();
                async move { api.score(&request).await }
            })
            .await?;

        if opportunity.pair != pair {
            tracing::warn!(
                requested = %pair,
                returned = %opportunity.pair,
                "Advisory returned mismatched pair, correcting"
            );
            opportunity.pair = pair;
        }
        opportunity.p_up = clamp_unit(opportunity.p_up);
        opportunity.score = clamp_unit(opportunity.score);

        Ok(opportunity)
    }

    pub async fn plan_execution(
        &self,
        opportunity: &Opportunity,
        context: &RiskContext,
    ) -> Result<Decision> {
        let pair = opportunity.pair.clone();
        let base = PlanRequest::new(opportunity, context);

        let mut decision = self
            .with_retry("plan", &pair, |prior_error| {
                let request = PlanRequest {
                    prior_error,
                    ..base.clone()
                };
                let api = self.api.clone();
                async move { api.plan(&request).await }
            })
            .await?;

        if decision.pair != pair {
            tracing::warn!(
                requested = %pair,
                returned = %decision.pair,
                "Execution plan returned mismatched pair, correcting"
            );
            decision.pair = pair;
        }
        decision.confidence = clamp_unit(decision.confidence);
        if !decision.notional.is_finite() || decision.notional < 0.0 {
            decision.notional = 0.0;
        }
        if decision.is_hold() {
            decision.notional = 0.0;
            decision.limit_price = None;
        }

        Ok(decision)
    }

    async fn with_retry<T, F, Fut>(&self, call: &str, pair: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<T, AdvisoryError>>,
    {
        let max_attempts = self.retries + 1;
        let mut prior_error: Option<String> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                tokio::time::sleep(self.backoff * (attempt - 1)).await;
            }

            match attempt_fn(prior_error.take()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(call, pair, attempt, "Advisory call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(call, pair, attempt, error = %message, "Advisory call failed");

                    if !e.is_transient() || attempt >= max_attempts {
                        return Err(EngineError::AdvisoryUnavailable {
                            attempts: attempt,
                            last_error: message,
                        });
                    }
                    prior_error = Some(message);
                }
            }
        }
    }
}
