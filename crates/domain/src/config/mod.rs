mod dispatcher;
mod github;
mod google;
mod scheduling;
mod sender;
mod supabase;

pub use dispatcher::*;
pub use github::*;
pub use google::*;
pub use scheduling::*;
pub use sender::*;
pub use supabase::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::targeting::parse_hhmm;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    /// Directory for the property store and other local state.
    #[serde(default = "d_state_path")]
    pub state_path: std::path::PathBuf,
}

fn d_state_path() -> std::path::PathBuf {
    "./data".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            google: GoogleConfig::default(),
            supabase: SupabaseConfig::default(),
            github: GithubConfig::default(),
            dispatcher: DispatcherConfig::default(),
            sender: SenderConfig::default(),
            scheduling: SchedulingConfig::default(),
            state_path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

fn check_url(issues: &mut Vec<ConfigError>, field: &str, url: &str) {
    if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
        issues.push(err(
            field,
            format!("must start with http:// or https:// (got \"{url}\")"),
        ));
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        // ── Supabase ─────────────────────────────────────────────────
        if self.supabase.base_url.is_empty() {
            issues.push(err("supabase.base_url", "base_url must not be empty"));
        }
        check_url(&mut issues, "supabase.base_url", &self.supabase.base_url);

        // ── Google ───────────────────────────────────────────────────
        if self.google.spreadsheet_id.is_empty() {
            issues.push(err(
                "google.spreadsheet_id",
                "spreadsheet_id must not be empty",
            ));
        }
        if self.google.service_account_path.as_os_str().is_empty() {
            issues.push(err(
                "google.service_account_path",
                "service account JSON path must not be empty",
            ));
        }
        if self.google.bucket.is_empty() {
            issues.push(err("google.bucket", "bucket must not be empty"));
        }

        // ── Dispatcher modes require the full task-queue wiring ──────
        let queue_wired = !self.google.tasks_queue_path.is_empty()
            && !self.dispatcher.base_url.is_empty()
            && !self.dispatcher.audience_service_account.is_empty();
        if (self.sender.use_gcp_batch || self.sender.use_serverless) && !queue_wired {
            issues.push(warn(
                "sender",
                "batch/serverless defaults set but tasks_queue_path, dispatcher.base_url, \
                 or dispatcher.audience_service_account is missing — dispatches will fall \
                 back to the CI workflow",
            ));
        }
        check_url(&mut issues, "dispatcher.base_url", &self.dispatcher.base_url);

        // ── GitHub fallback needs a repo ─────────────────────────────
        if self.github.owner.is_empty() || self.github.repo.is_empty() {
            issues.push(warn(
                "github",
                "owner/repo not set — the CI-workflow fallback backend is unavailable",
            ));
        }

        // ── Tunables ─────────────────────────────────────────────────
        if self.sender.shard_count == 0 {
            issues.push(err("sender.shard_count", "shard_count must be greater than 0"));
        }
        if self.sender.batch.max_parallelism == 0 {
            issues.push(err(
                "sender.batch.max_parallelism",
                "max_parallelism must be greater than 0",
            ));
        }
        if self.scheduling.default_session_hours <= 0.0 {
            issues.push(err(
                "scheduling.default_session_hours",
                "default_session_hours must be greater than 0",
            ));
        }
        if parse_hhmm(&self.scheduling.default_send_end_time).is_none() {
            issues.push(err(
                "scheduling.default_send_end_time",
                format!(
                    "not a valid HH:MM time: \"{}\"",
                    self.scheduling.default_send_end_time
                ),
            ));
        }

        issues
    }
}
