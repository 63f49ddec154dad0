//! Form-sender dispatcher REST client.
//!
//! The dispatcher turns an enqueued payload into a container-job or
//! serverless-job execution. The orchestrator talks to it directly for
//! config pre-validation and execution control.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use fso_domain::error::{Error, Result};
use fso_google::auth::{scopes, TokenProvider};

/// Result of dispatcher-side config validation.
#[derive(Clone, Debug, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// One running (or finished) execution as reported by the dispatcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub targeting_id: i64,
    pub status: String,
    #[serde(default)]
    pub run_index_base: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct ExecutionsResponse {
    #[serde(default)]
    executions: Vec<ExecutionSummary>,
}

/// Seam used by the dispatch router and task control.
#[async_trait]
pub trait DispatcherApi: Send + Sync {
    async fn validate_config(&self, config: &serde_json::Value) -> Result<ValidationResult>;
    async fn list_running(&self, targeting_id: Option<i64>) -> Result<Vec<ExecutionSummary>>;
    async fn cancel_execution(&self, execution_id: &str) -> Result<()>;
}

pub struct DispatcherClient {
    http: Client,
    base_url: String,
    token: Arc<TokenProvider>,
}

impl DispatcherClient {
    pub fn new(base_url: &str, token: Arc<TokenProvider>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    async fn bearer(&self) -> Result<String> {
        self.token.access_token(scopes::CLOUD_PLATFORM).await
    }
}

#[async_trait]
impl DispatcherApi for DispatcherClient {
    async fn validate_config(&self, config: &serde_json::Value) -> Result<ValidationResult> {
        let url = format!("{}/v1/form-sender/validate-config", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .json(config)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return serde_json::from_str(&body).map_err(Error::from);
        }
        if status.as_u16() == 400 || status.as_u16() == 422 {
            // Validation rejections come back as client errors.
            return Ok(ValidationResult {
                valid: false,
                message: Some(body),
            });
        }
        Err(Error::Dispatcher(format!(
            "validate-config returned {status}: {body}"
        )))
    }

    async fn list_running(&self, targeting_id: Option<i64>) -> Result<Vec<ExecutionSummary>> {
        let mut url = format!(
            "{}/v1/form-sender/executions?status=running",
            self.base_url
        );
        if let Some(id) = targeting_id {
            url.push_str(&format!("&targeting_id={id}"));
        }
        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Dispatcher(format!(
                "executions list returned {status}: {body}"
            )));
        }
        let parsed: ExecutionsResponse =
            resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(parsed.executions)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let url = format!(
            "{}/v1/form-sender/executions/{}/cancel",
            self.base_url, execution_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Dispatcher(format!(
                "cancel of {execution_id} returned {status}: {body}"
            )));
        }
        Ok(())
    }
}
