use crate::error::EngineError;
use crate::risk::RiskState;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

const DEFAULT_KEY: &str = "spotpilot:risk_state";

/// Durable home for the RiskState snapshot
///
/// Lets the cooldown table and daily PnL survive a restart.
#[async_trait]
pub trait RiskStateStore: Send + Sync {
    async fn load(&self) -> Result<Option<RiskState>>;

    async fn save(&self, state: &RiskState) -> Result<()>;
}

/// Redis-backed RiskState store
///
/// The whole state is one JSON value under a single key.
pub struct RedisRiskStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisRiskStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_key(redis_url, DEFAULT_KEY).await
    }

    pub async fn with_key(redis_url: &str, key: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| EngineError::Ledger("redis connection timeout after 5 seconds".into()))??;

        tracing::info!("Connected to Redis risk store");

        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }

    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&self.key).await?;
        Ok(())
    }
}

#[async_trait]
impl RiskStateStore for RedisRiskStore {
    async fn load(&self) -> Result<Option<RiskState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await?;

        match raw {
            Some(json) => {
                let state: RiskState = serde_json::from_str(&json)?;
                tracing::info!(
                    cooldowns = state.last_analyzed.len(),
                    daily_pnl = state.daily_pnl,
                    "Loaded risk state from Redis"
                );
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &RiskState) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(state)?;
        conn.set::<_, _, ()>(&self.key, json).await?;
        tracing::debug!("Saved risk state to Redis");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_connection_timeout() {
        let result = RedisRiskStore::new("redis://192.0.2.1:6379").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_save_and_load_state() {
        let store = RedisRiskStore::with_key("redis://127.0.0.1:6379", "spotpilot:test_state")
            .await
            .expect("Failed to connect to Redis");
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        let now = Utc::now();
        let mut state = RiskState::new(1000.0, now);
        state.record_analysis("SOLUSDT", now);
        state.record_close(-7.5, now);
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);

        store.clear().await.unwrap();
    }
}
