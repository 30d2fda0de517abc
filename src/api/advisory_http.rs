use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::advisory::{AdvisoryApi, AdvisoryError, PlanRequest, ScoreRequest};
use crate::config::AdvisorySettings;
use crate::models::{Decision, Opportunity};

/// JSON-over-HTTP client for the scoring and planning services
pub struct HttpAdvisoryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// Model output sometimes arrives wrapped in a markdown code fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    }
}

impl HttpAdvisoryClient {
    pub fn new(settings: &AdvisorySettings) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AdvisoryError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdvisoryError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AdvisoryError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| AdvisoryError::Malformed(format!("{} (body: {})", e, text)))
    }
}

#[async_trait]
impl AdvisoryApi for HttpAdvisoryClient {
    async fn score(&self, request: &ScoreRequest) -> Result<Opportunity, AdvisoryError> {
        self.post("/v1/score", request).await
    }

    async fn plan(&self, request: &PlanRequest) -> Result<Decision, AdvisoryError> {
        self.post("/v1/plan", request).await
    }
}
