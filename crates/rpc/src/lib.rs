//! Stored-procedure client for the queue database.
//!
//! Every call is a JSON POST to `{base}/rest/v1/rpc/{name}` with API-key +
//! bearer headers. Statement timeouts are recognized from the response body
//! and retried with exponential back-off (1 s → 2 s → 4 s); the final error
//! keeps its statement-timeout identity so the queue builder can switch to
//! its chunked fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use fso_domain::config::SupabaseConfig;
use fso_domain::error::{is_statement_timeout, Error, Result};
use fso_domain::retry::RetryPolicy;

/// Seam for the queue builder: calls a named stored procedure.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    /// Invoke `name` with `params`, hinting the given statement timeout.
    /// Returns the decoded JSON body (`null` allowed).
    async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
        statement_timeout: Duration,
    ) -> Result<serde_json::Value>;
}

/// REST implementation against a Supabase-style PostgREST endpoint.
pub struct SupabaseRpcClient {
    http: Client,
    base_url: String,
    service_role_key: String,
    retry: RetryPolicy,
}

impl SupabaseRpcClient {
    /// Build a client from config; the service-role key is read from the
    /// configured environment variable.
    pub fn new(cfg: &SupabaseConfig) -> Result<Self> {
        let service_role_key = std::env::var(&cfg.service_role_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set",
                cfg.service_role_key_env
            ))
        })?;
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            service_role_key,
            retry: RetryPolicy::rpc(),
        })
    }

    fn url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, name)
    }
}

#[async_trait]
impl RpcCaller for SupabaseRpcClient {
    async fn call(
        &self,
        name: &str,
        params: serde_json::Value,
        statement_timeout: Duration,
    ) -> Result<serde_json::Value> {
        let url = self.url(name);

        self.retry
            .run(
                |attempt| {
                    let url = url.clone();
                    let params = params.clone();
                    async move {
                        if attempt > 0 {
                            tracing::info!(procedure = name, attempt, "retrying after statement timeout");
                        }
                        let resp = self
                            .http
                            .post(&url)
                            .header("apikey", &self.service_role_key)
                            .bearer_auth(&self.service_role_key)
                            .header(
                                "x-statement-timeout-ms",
                                statement_timeout.as_millis().to_string(),
                            )
                            .json(&params)
                            .send()
                            .await
                            .map_err(|e| {
                                if e.is_timeout() {
                                    Error::Timeout(e.to_string())
                                } else {
                                    Error::Http(e.to_string())
                                }
                            })?;

                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();

                        if status.is_success() {
                            if body.trim().is_empty() {
                                return Ok(serde_json::Value::Null);
                            }
                            return serde_json::from_str(&body).map_err(Error::from);
                        }

                        if status.is_server_error() && is_statement_timeout(&body) {
                            return Err(Error::StatementTimeout {
                                procedure: name.to_owned(),
                            });
                        }

                        Err(Error::Rpc {
                            procedure: name.to_owned(),
                            message: format!("{status}: {body}"),
                        })
                    }
                },
                |e| matches!(e, Error::StatementTimeout { .. }),
            )
            .await
    }
}
