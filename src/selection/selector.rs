use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;

use crate::advisory::AdvisoryGateway;
use crate::error::EngineError;
use crate::models::{Decision, MarketSnapshot, Opportunity, Position};
use crate::risk::RiskState;
use crate::snapshot::SnapshotBuilder;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Position open: the held pair, scored for continue/exit planning
    Manage {
        opportunity: Opportunity,
        snapshot: MarketSnapshot,
    },
    /// Best qualifying entry candidate
    Candidate {
        opportunity: Opportunity,
        snapshot: MarketSnapshot,
    },
    /// Nothing to do this cycle
    NoOp(Decision),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanFailure {
    pub pair: String,
    pub error: EngineError,
}

/// Scans eligible pairs and picks at most one to act on
pub struct OpportunitySelector {
    builder: Arc<SnapshotBuilder>,
    gateway: AdvisoryGateway,
    pairs: Vec<String>,
    min_score: f64,
    cooldown: Duration,
}

impl OpportunitySelector {
    pub fn new(
        builder: Arc<SnapshotBuilder>,
        gateway: AdvisoryGateway,
        pairs: Vec<String>,
        min_score: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            builder,
            gateway,
            pairs,
            min_score,
            cooldown,
        }
    }

    pub fn pairs(&self) -> &[String] {
        &self.pairs
    }

    async fn analyze(&self, pair: &str) -> Result<(MarketSnapshot, Opportunity)> {
        let snapshot = self.builder.build(pair).await?;
        let opportunity = self.gateway.score_opportunity(&snapshot).await?;
        Ok((snapshot, opportunity))
    }

    pub async fn select(
        &self,
        risk: &RiskState,
        position: Option<&Position>,
        now: DateTime<Utc>,
    ) -> Result<(Selection, Vec<ScanFailure>)> {
        if let Some(position) = position {
            let (snapshot, opportunity) = self.analyze(&position.pair).await?;
            return Ok((
                Selection::Manage {
                    opportunity,
                    snapshot,
                },
                Vec::new(),
            ));
        }

        let eligible = risk.eligible_pairs(&self.pairs, now, self.cooldown);
        if eligible.is_empty() {
            tracing::info!("All pairs in cooldown, nothing to scan");
            return Ok((
                Selection::NoOp(Decision::no_op("all pairs in cooldown")),
                Vec::new(),
            ));
        }

        tracing::info!(pairs = ?eligible, "Scanning pairs");

        let results = join_all(eligible.iter().map(|pair| async move {
            (pair.clone(), self.analyze(pair).await)
        }))
        .await;

        let mut failures = Vec::new();
        let mut scored = Vec::new();
        for (pair, result) in results {
            match result {
                Ok(analysis) => scored.push(analysis),
                Err(error) => {
                    tracing::warn!(pair = %pair, error = %error, "Pair scan failed");
                    failures.push(ScanFailure { pair, error });
                }
            }
        }

        if scored.is_empty() {
            // Advisory outage is a cycle error; missing data everywhere is not
            if let Some(failure) = failures
                .iter()
                .rev()
                .find(|f| matches!(f.error, EngineError::AdvisoryUnavailable { .. }))
            {
                return Err(failure.error.clone());
            }
            return Ok((
                Selection::NoOp(Decision::no_op("no pair produced a usable snapshot")),
                failures,
            ));
        }

        let best = scored
            .into_iter()
            .filter(|(_, o)| o.score >= self.min_score)
            .max_by(|(_, a), (_, b)| a.score.total_cmp(&b.score));

        let selection = match best {
            Some((snapshot, opportunity)) => {
                tracing::info!(
                    pair = %opportunity.pair,
                    score = opportunity.score,
                    p_up = opportunity.p_up,
                    "Selected opportunity"
                );
                Selection::Candidate {
                    opportunity,
                    snapshot,
                }
            }
            None => Selection::NoOp(Decision::no_op(
                format!("no opportunity scored at least {:.2}", self.min_score),
            )),
        };

        Ok((selection, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionSettings, TradingSettings};
    use crate::engine::fakes::{FakeAdvisory, FakeExchange};
    use crate::models::NO_PAIR;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;

    const PAIRS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

    fn exchange() -> Arc<FakeExchange> {
        Arc::new(
            FakeExchange::new(1000.0)
                .with_market("BTCUSDT", 60_000.0)
                .with_market("ETHUSDT", 3_000.0)
                .with_market("SOLUSDT", 150.0),
        )
    }

    fn selector(exchange: Arc<FakeExchange>, advisory: Arc<FakeAdvisory>) -> OpportunitySelector {
        let builder = Arc::new(SnapshotBuilder::new(
            exchange,
            &TradingSettings::default(),
            &ExecutionSettings::default(),
        ));
        let gateway = AdvisoryGateway::with_policy(advisory, 1, StdDuration::ZERO);
        OpportunitySelector::new(
            builder,
            gateway,
            PAIRS.iter().map(|p| p.to_string()).collect(),
            0.5,
            Duration::seconds(900),
        )
    }

    fn candidate_pair(selection: &Selection) -> Option<&str> {
        match selection {
            Selection::Candidate { opportunity, .. } => Some(&opportunity.pair),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_picks_highest_score() {
        let advisory = Arc::new(
            FakeAdvisory::default()
                .with_score("BTCUSDT", 0.6, 0.55)
                .with_score("ETHUSDT", 0.7, 0.9)
                .with_score("SOLUSDT", 0.65, 0.7),
        );
        let now = Utc::now();
        let risk = RiskState::new(1000.0, now);

        let (selection, failures) = selector(exchange(), advisory)
            .select(&risk, None, now)
            .await
            .unwrap();

        assert_eq!(candidate_pair(&selection), Some("ETHUSDT"));
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_excludes_pair() {
        let advisory = Arc::new(
            FakeAdvisory::default()
                .with_score("ETHUSDT", 0.7, 0.9)
                .with_score("SOLUSDT", 0.65, 0.7),
        );
        let now = Utc::now();
        let mut risk = RiskState::new(1000.0, now);
        risk.record_analysis("ETHUSDT", now - Duration::seconds(60));

        let (selection, _) = selector(exchange(), advisory.clone())
            .select(&risk, None, now)
            .await
            .unwrap();

        assert_eq!(candidate_pair(&selection), Some("SOLUSDT"));
        assert_eq!(advisory.score_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_in_cooldown_is_noop() {
        let advisory = Arc::new(FakeAdvisory::default());
        let now = Utc::now();
        let mut risk = RiskState::new(1000.0, now);
        for pair in PAIRS {
            risk.record_analysis(pair, now);
        }

        let (selection, _) = selector(exchange(), advisory.clone())
            .select(&risk, None, now)
            .await
            .unwrap();

        assert!(matches!(selection, Selection::NoOp(ref d) if d.is_hold() && d.pair == NO_PAIR));
        assert_eq!(advisory.score_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_isolated_per_pair() {
        let advisory = Arc::new(
            FakeAdvisory::default()
                .failing("BTCUSDT")
                .with_score("SOLUSDT", 0.65, 0.7),
        );
        let exchange = exchange();
        // No candles for ETH
        exchange.closes.lock().unwrap().remove("ETHUSDT");
        let now = Utc::now();
        let risk = RiskState::new(1000.0, now);

        let (selection, failures) = selector(exchange, advisory)
            .select(&risk, None, now)
            .await
            .unwrap();

        assert_eq!(candidate_pair(&selection), Some("SOLUSDT"));
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| matches!(
            f.error,
            EngineError::InsufficientData { ref pair, .. } if pair == "ETHUSDT"
        )));
    }

    #[tokio::test]
    async fn test_total_advisory_outage_is_error() {
        let advisory = Arc::new(
            FakeAdvisory::default()
                .failing("BTCUSDT")
                .failing("ETHUSDT")
                .failing("SOLUSDT"),
        );
        let now = Utc::now();
        let risk = RiskState::new(1000.0, now);

        let err = selector(exchange(), advisory)
            .select(&risk, None, now)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::AdvisoryUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_low_scores_do_not_qualify() {
        let advisory = Arc::new(
            FakeAdvisory::default()
                .with_score("BTCUSDT", 0.6, 0.2)
                .with_score("ETHUSDT", 0.6, 0.49),
        );
        let now = Utc::now();
        let risk = RiskState::new(1000.0, now);

        let (selection, _) = selector(exchange(), advisory)
            .select(&risk, None, now)
            .await
            .unwrap();

        let Selection::NoOp(decision) = selection else {
            panic!("expected a no-op selection");
        };
        assert_eq!(decision.pair, NO_PAIR);
        assert!(decision.rationale.contains("0.50"));
    }

    #[tokio::test]
    async fn test_position_mode_scans_only_held_pair() {
        let advisory = Arc::new(FakeAdvisory::default().with_score("SOLUSDT", 0.4, 0.3));
        let now = Utc::now();
        let mut risk = RiskState::new(1000.0, now);
        // Cooldown does not apply to the held pair
        risk.record_analysis("SOLUSDT", now);
        let position = Position {
            pair: "SOLUSDT".to_string(),
            entry_price: 140.0,
            size: 100.0,
            quantity: 100.0 / 140.0,
            stop_pct: Some(0.02),
            take_pct: Some(0.03),
            opened_at: None,
            entry_reliable: true,
        };

        let (selection, _) = selector(exchange(), advisory.clone())
            .select(&risk, Some(&position), now)
            .await
            .unwrap();

        match selection {
            Selection::Manage { opportunity, .. } => assert_eq!(opportunity.pair, "SOLUSDT"),
            other => panic!("expected Manage, got {:?}", other),
        }
        assert_eq!(advisory.score_calls.load(Ordering::SeqCst), 1);
    }
}
