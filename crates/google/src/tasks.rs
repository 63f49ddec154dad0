//! Cloud Tasks enqueue client.
//!
//! Task names are deterministic (`fs-{yyyyMMdd}-{targeting}-{base}` after
//! character filtering), so a duplicate enqueue comes back as HTTP 409
//! `ALREADY_EXISTS` and is surfaced as a success with `duplicate = true`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Tokyo;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use fso_domain::error::{Error, Result};
use fso_domain::retry::RetryPolicy;

use crate::auth::{scopes, TokenProvider};

/// Hour (JST) after which task retries stop: the delivery window closes at
/// 19:00 regardless of back-off state.
const RETRY_CUTOFF_HOUR_JST: u32 = 19;

/// Per-task retry window carried in the enqueue request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TaskRetryWindow {
    pub max_attempts: u32,
    pub min_backoff_seconds: u32,
    pub max_backoff_seconds: u32,
    /// Cumulative retry budget; 0 when the cutoff already passed.
    pub max_retry_duration_seconds: u64,
}

/// Compute the retry window for a task enqueued at `now`: 3 attempts,
/// 60 s–600 s back-off, capped at the seconds remaining until 19:00 JST.
pub fn retry_window(now: DateTime<Utc>) -> TaskRetryWindow {
    let local = now.with_timezone(&Tokyo);
    let cutoff = local
        .date_naive()
        .and_hms_opt(RETRY_CUTOFF_HOUR_JST, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Tokyo).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    let remaining = (cutoff - now).num_seconds().max(0) as u64;
    TaskRetryWindow {
        max_attempts: 3,
        min_backoff_seconds: 60,
        max_backoff_seconds: 600,
        max_retry_duration_seconds: remaining,
    }
}

/// Replace every character outside `[A-Za-z0-9-]` with `-`.
pub fn sanitize_task_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// A task ready to enqueue.
#[derive(Clone, Debug)]
pub struct TaskRequest {
    pub task_id: String,
    /// Dispatcher URL the queue will POST to.
    pub url: String,
    pub oidc_service_account: String,
    /// JSON payload bytes; base64-encoded into the task body.
    pub body: Vec<u8>,
    pub schedule_delay: Duration,
    pub retry: TaskRetryWindow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Created { name: String },
    /// The task name already exists — an idempotent duplicate.
    Duplicate { name: String },
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate { .. })
    }
}

/// Seam for the dispatch router: idempotent task enqueue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Full task name for an id, after character filtering.
    fn task_name(&self, task_id: &str) -> String;
    async fn enqueue(&self, request: &TaskRequest, now: DateTime<Utc>) -> Result<EnqueueOutcome>;
}

#[async_trait]
impl TaskQueue for TasksClient {
    fn task_name(&self, task_id: &str) -> String {
        TasksClient::task_name(self, task_id)
    }

    async fn enqueue(&self, request: &TaskRequest, now: DateTime<Utc>) -> Result<EnqueueOutcome> {
        TasksClient::enqueue(self, request, now).await
    }
}

pub struct TasksClient {
    http: Client,
    endpoint: String,
    queue_path: String,
    token: Arc<TokenProvider>,
    retry: RetryPolicy,
}

impl TasksClient {
    pub fn new(
        endpoint: &str,
        queue_path: &str,
        token: Arc<TokenProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            queue_path: queue_path.trim_matches('/').to_owned(),
            token,
            retry: RetryPolicy::storage(),
        })
    }

    /// Full task name for an id, after character filtering.
    pub fn task_name(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.queue_path, sanitize_task_id(task_id))
    }

    pub async fn enqueue(&self, request: &TaskRequest, now: DateTime<Utc>) -> Result<EnqueueOutcome> {
        let name = self.task_name(&request.task_id);
        let schedule_time = now + chrono::Duration::from_std(request.schedule_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        let body = json!({
            "task": {
                "name": name,
                "scheduleTime": schedule_time.to_rfc3339(),
                "httpRequest": {
                    "httpMethod": "POST",
                    "url": request.url,
                    "headers": { "Content-Type": "application/json" },
                    "body": base64::engine::general_purpose::STANDARD.encode(&request.body),
                    "oidcToken": {
                        "serviceAccountEmail": request.oidc_service_account,
                        "audience": request.url,
                    },
                },
                "retryConfig": {
                    "maxAttempts": request.retry.max_attempts,
                    "minBackoff": format!("{}s", request.retry.min_backoff_seconds),
                    "maxBackoff": format!("{}s", request.retry.max_backoff_seconds),
                    "maxRetryDuration": format!("{}s", request.retry.max_retry_duration_seconds),
                },
            }
        });
        let url = format!("{}/{}/tasks", self.endpoint, self.queue_path);

        self.retry
            .run(
                |_| {
                    let url = url.clone();
                    let name = name.clone();
                    let body = body.clone();
                    async move {
                        let token = self.token.access_token(scopes::CLOUD_PLATFORM).await?;
                        let resp = self
                            .http
                            .post(&url)
                            .bearer_auth(token)
                            .json(&body)
                            .send()
                            .await
                            .map_err(|e| Error::Http(e.to_string()))?;
                        let status = resp.status().as_u16();
                        if status == 409 {
                            tracing::info!(task = %name, "task already exists, treating as success");
                            return Ok(EnqueueOutcome::Duplicate { name });
                        }
                        if status >= 300 {
                            let text = resp.text().await.unwrap_or_default();
                            // The API also spells duplicates inside error bodies.
                            if text.contains("ALREADY_EXISTS") {
                                return Ok(EnqueueOutcome::Duplicate { name });
                            }
                            return Err(Error::Http(format!(
                                "task enqueue returned {status}: {text}"
                            )));
                        }
                        Ok(EnqueueOutcome::Created { name })
                    }
                },
                |e| matches!(e, Error::Http(_) | Error::Timeout(_)),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_replaces_forbidden_characters() {
        assert_eq!(sanitize_task_id("fs-20240610-9-0"), "fs-20240610-9-0");
        assert_eq!(sanitize_task_id("fs_2024/06.10"), "fs-2024-06-10");
        assert_eq!(sanitize_task_id("日本語id"), "---id");
    }

    #[test]
    fn retry_window_before_cutoff() {
        // 13:00 JST = 04:00 UTC → 6 hours until 19:00 JST.
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 4, 0, 0).unwrap();
        let w = retry_window(now);
        assert_eq!(w.max_attempts, 3);
        assert_eq!(w.min_backoff_seconds, 60);
        assert_eq!(w.max_backoff_seconds, 600);
        assert_eq!(w.max_retry_duration_seconds, 6 * 3600);
    }

    #[test]
    fn retry_window_after_cutoff_floors_at_zero() {
        // 20:00 JST = 11:00 UTC → past the cutoff.
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 11, 0, 0).unwrap();
        assert_eq!(retry_window(now).max_retry_duration_seconds, 0);
    }

    #[test]
    fn task_ids_are_deterministic() {
        let a = sanitize_task_id("fs-20240610-9-0");
        let b = sanitize_task_id("fs-20240610-9-0");
        assert_eq!(a, b);
    }
}
