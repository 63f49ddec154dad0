use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The HTTP service that turns a task payload into a container-job or
/// serverless-job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub base_url: String,
    /// Service account used as the OIDC audience identity on enqueued tasks.
    #[serde(default)]
    pub audience_service_account: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            audience_service_account: String::new(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_timeout_ms() -> u64 {
    25_000
}
