use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::engine::OperatingMode;
use crate::Result;

/// Top-level settings
///
/// Layered: `config/default.toml`, then `config/local.toml`, then
/// `SPOTPILOT__<SECTION>__<KEY>` environment variables. Every field has a
/// default, so an empty configuration is valid (testnet, manual mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub advisory: AdvisorySettings,
    pub trading: TradingSettings,
    pub risk: RiskConfig,
    pub execution: ExecutionSettings,
    pub storage: StorageSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    pub fn load_from(dir: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("{}/default", dir)).required(false))
            .add_source(config::File::with_name(&format!("{}/local", dir)).required(false))
            .add_source(
                config::Environment::with_prefix("SPOTPILOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trading.pairs")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
    pub quote_asset: String,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.binance.vision".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            recv_window_ms: 5_000,
            requests_per_minute: 600,
            quote_asset: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Extra attempts after the first one
    pub retries: u32,
    /// Backoff before retry n is `backoff_ms * n`
    pub backoff_ms: u64,
}

impl Default for AdvisorySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            api_key: None,
            timeout_secs: 60,
            retries: 1,
            backoff_ms: 1_500,
        }
    }
}

impl AdvisorySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub pairs: Vec<String>,
    pub short_interval: String,
    pub short_limit: u32,
    pub long_interval: String,
    pub long_limit: u32,
    pub autonomous_interval_secs: u64,
    pub mode: OperatingMode,
    pub min_opportunity_score: f64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            pairs: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
                "BNBUSDT".to_string(),
                "XRPUSDT".to_string(),
            ],
            short_interval: "5m".to_string(),
            short_limit: 200,
            long_interval: "15m".to_string(),
            long_limit: 96,
            autonomous_interval_secs: 75,
            mode: OperatingMode::Manual,
            min_opportunity_score: 0.5,
        }
    }
}

/// Risk limits and gate parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    pub initial_capital: f64,
    /// Negative fraction of initial capital, e.g. -0.02
    pub daily_loss_limit: f64,
    pub risk_per_trade: f64,
    pub execution_threshold: f64,
    pub cooldown_secs: u64,
    pub min_stop_pct: f64,
    pub atr_stop_multiple: f64,
    pub reward_multiple: f64,
    pub max_take_pct: f64,
    /// Round-trip taker fees as a fraction
    pub fee_pct: f64,
    pub max_spread_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000.0,
            daily_loss_limit: -0.02,
            risk_per_trade: 0.10,
            execution_threshold: 0.75,
            cooldown_secs: 900,
            min_stop_pct: 0.004,
            atr_stop_multiple: 1.5,
            reward_multiple: 1.5,
            max_take_pct: 0.03,
            fee_pct: 0.002,
            max_spread_pct: 0.0015,
        }
    }
}

impl RiskConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub min_notional: f64,
    pub dust_threshold: f64,
    /// Assumed slippage floor added to half the spread
    pub base_slippage_pct: f64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            min_notional: 5.0,
            dust_threshold: 1.0,
            base_slippage_pct: 0.0002,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}
