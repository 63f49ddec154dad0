//! GitHub Actions client — the CI-workflow fallback backend.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use fso_domain::config::GithubConfig;
use fso_domain::error::{Error, Result};

fn targeting_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"targeting_id=(\d+)").expect("static pattern"))
}

/// One workflow run from the runs listing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub display_title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub message: String,
}

impl WorkflowRun {
    /// Does this run belong to the form-sender workflow?
    pub fn is_form_sender(&self) -> bool {
        self.name.to_lowercase().contains("form-sender")
            || self.path.to_lowercase().contains("form-sender")
    }

    /// Extract `targeting_id=N` from the commit message or run title.
    pub fn targeting_id(&self) -> Option<i64> {
        let from = |text: &str| {
            targeting_id_pattern()
                .captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        };
        self.head_commit
            .as_ref()
            .and_then(|c| from(&c.message))
            .or_else(|| from(&self.display_title))
    }
}

#[derive(Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

/// Seam used by the dispatch router and task control.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Fire a `workflow_dispatch` with the given inputs.
    async fn dispatch(&self, inputs: serde_json::Value) -> Result<()>;
    /// In-progress runs of the form-sender workflow.
    async fn list_running(&self) -> Result<Vec<WorkflowRun>>;
    /// Cancel one run. HTTP 202 is a successful cancel.
    async fn cancel_run(&self, run_id: u64) -> Result<()>;
}

pub struct GithubClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
    workflow: String,
    git_ref: String,
    token: String,
}

impl GithubClient {
    /// Build a client from config; the token is read from the configured
    /// environment variable.
    pub fn new(cfg: &GithubConfig) -> Result<Self> {
        let token = std::env::var(&cfg.token_env)
            .map_err(|_| Error::Config(format!("environment variable '{}' not set", cfg.token_env)))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_owned(),
            owner: cfg.owner.clone(),
            repo: cfg.repo.clone(),
            workflow: cfg.workflow.clone(),
            git_ref: cfg.git_ref.clone(),
            token,
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, tail
        )
    }

    fn request(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "formsender-orchestrator")
    }
}

#[async_trait]
impl WorkflowApi for GithubClient {
    async fn dispatch(&self, inputs: serde_json::Value) -> Result<()> {
        let url = self.repo_url(&format!("actions/workflows/{}/dispatches", self.workflow));
        let body = json!({ "ref": self.git_ref, "inputs": inputs });
        let resp = self
            .request(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Github(format!(
                "workflow_dispatch returned {status}: {text}"
            )));
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<WorkflowRun>> {
        let url = self.repo_url("actions/runs?status=in_progress&per_page=50");
        let resp = self
            .request(self.http.get(&url))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Github(format!(
                "runs listing returned {status}: {text}"
            )));
        }
        let parsed: RunsResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(parsed
            .workflow_runs
            .into_iter()
            .filter(WorkflowRun::is_form_sender)
            .collect())
    }

    async fn cancel_run(&self, run_id: u64) -> Result<()> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/cancel"));
        let resp = self
            .request(self.http.post(&url))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        // 202 Accepted is the documented success response.
        if status != 202 && !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Github(format!(
                "cancel of run {run_id} returned {status}: {text}"
            )));
        }
        Ok(())
    }
}
