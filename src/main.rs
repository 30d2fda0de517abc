use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use spotpilot::api::{BinanceClient, HttpAdvisoryClient};
use spotpilot::engine::{Autopilot, CycleEvent, EngineController, EngineDeps};
use spotpilot::ledger::{LedgerStore, MemoryLedger, PostgresLedger};
use spotpilot::persistence::{RedisRiskStore, RiskStateStore};
use spotpilot::{Action, Decision, OperatingMode, OrderKind, Settings, TriggerSource};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Spot trading decision and risk engine")]
struct Cli {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config_dir: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until Ctrl+C
    Run {
        /// Start in autonomous mode regardless of configuration
        #[arg(long)]
        autonomous: bool,
    },
    /// Run one manual cycle and print the gated decision without executing
    Decide,
    /// Execute an operator-approved decision
    Execute {
        pair: String,
        #[arg(value_enum)]
        side: Side,
        /// Quote notional; ignored for SELL, which always closes the position
        #[arg(long, default_value_t = 0.0)]
        notional: f64,
        #[arg(long)]
        limit_price: Option<f64>,
    },
    /// Sell the full balance of a pair
    ForceClose { pair: String },
    /// Clear daily PnL and cooldowns
    Reset,
    /// Print engine status as JSON
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config_dir).context("Failed to load configuration")?;

    let controller = build_engine(&settings).await?;
    controller
        .initialize()
        .await
        .context("Failed to initialize engine state")?;

    match cli.command {
        Command::Run { autonomous } => {
            if autonomous {
                controller.set_mode(OperatingMode::Autonomous);
            }
            tracing::info!(
                mode = %controller.mode(),
                pairs = ?settings.trading.pairs,
                "Engine running, press Ctrl+C to stop"
            );

            let autopilot = Autopilot::new(
                controller.clone(),
                Duration::from_secs(settings.trading.autonomous_interval_secs),
            );
            autopilot
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    }
                })
                .await;
            tracing::info!("Engine stopped");
        }
        Command::Decide => {
            let mut events = controller.run_cycle(TriggerSource::Manual, false)?;
            while let Some(event) = events.next().await {
                match event {
                    CycleEvent::Progress { stage, message } => println!("[{}] {}", stage, message),
                    CycleEvent::Done(outcome) => {
                        for note in &outcome.notes {
                            println!("note: {}", note);
                        }
                        for failure in &outcome.failures {
                            println!("skipped {}: {}", failure.pair, failure.error);
                        }
                        println!("{}", serde_json::to_string_pretty(&outcome.decision)?);
                    }
                    CycleEvent::Failed(e) => anyhow::bail!("cycle failed: {}", e),
                }
            }
        }
        Command::Execute {
            pair,
            side,
            notional,
            limit_price,
        } => {
            let decision = Decision {
                pair,
                action: match side {
                    Side::Buy => Action::Buy,
                    Side::Sell => Action::Sell,
                },
                order_kind: if limit_price.is_some() {
                    OrderKind::Limit
                } else {
                    OrderKind::Market
                },
                notional,
                stop_pct: None,
                take_pct: None,
                limit_price,
                confidence: 1.0,
                rationale: "operator approved".to_string(),
                exit_flags: None,
            };

            let outcome = controller.execute_decision(decision).await?;
            for note in &outcome.notes {
                println!("note: {}", note);
            }
            match outcome.report {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report.record)?),
                None => println!("not executed: {}", outcome.decision.rationale),
            }
        }
        Command::ForceClose { pair } => {
            let report = controller
                .force_close(&pair)
                .await
                .with_context(|| format!("Force close of {} failed", pair))?;
            println!("{}", serde_json::to_string_pretty(&report.record)?);
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
        }
        Command::Reset => {
            controller.reset().await;
            println!("risk state reset");
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&controller.status().await)?);
        }
    }

    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotpilot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_engine(settings: &Settings) -> Result<EngineController> {
    let exchange =
        BinanceClient::new(&settings.exchange).context("Failed to create exchange client")?;
    let advisory =
        HttpAdvisoryClient::new(&settings.advisory).context("Failed to create advisory client")?;

    let ledger: Arc<dyn LedgerStore> = match &settings.storage.database_url {
        Some(url) => {
            let ledger = PostgresLedger::connect(url)
                .await
                .context("Failed to connect to Postgres ledger")?;
            tracing::info!("Postgres ledger enabled");
            Arc::new(ledger)
        }
        None => {
            tracing::warn!("No database_url configured, using in-memory ledger");
            Arc::new(MemoryLedger::new())
        }
    };

    let store: Option<Arc<dyn RiskStateStore>> = match &settings.storage.redis_url {
        Some(url) => match RedisRiskStore::new(url).await {
            Ok(store) => {
                tracing::info!("Redis risk state persistence enabled");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Redis ({}), continuing without persistence",
                    e
                );
                None
            }
        },
        None => None,
    };

    Ok(EngineController::new(
        settings,
        EngineDeps {
            exchange: Arc::new(exchange),
            advisory: Arc::new(advisory),
            ledger,
            store,
        },
    ))
}
