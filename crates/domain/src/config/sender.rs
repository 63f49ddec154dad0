use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sender tunables
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch defaults. Property-store overrides (operator-facing keys) take
/// precedence over these values at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Workers launched inside one workflow run (clamped 1..4, 1..16 for batch).
    #[serde(default = "d_1")]
    pub workers_per_workflow: u32,
    /// Queue shard count handed to the queue-building procedures.
    #[serde(default = "d_8")]
    pub shard_count: u32,
    /// Global default: prefer the Cloud Batch backend.
    #[serde(default)]
    pub use_gcp_batch: bool,
    /// Global default: prefer the serverless (cloud-run) backend.
    #[serde(default)]
    pub use_serverless: bool,
    #[serde(default)]
    pub batch: BatchDefaults,
    #[serde(default)]
    pub signed_url: SignedUrlDefaults,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            workers_per_workflow: d_1(),
            shard_count: d_8(),
            use_gcp_batch: false,
            use_serverless: false,
            batch: BatchDefaults::default(),
            signed_url: SignedUrlDefaults::default(),
        }
    }
}

/// Cloud Batch resource-sizing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDefaults {
    #[serde(default = "d_1")]
    pub vcpu_per_worker: u32,
    #[serde(default = "d_2048")]
    pub memory_per_worker_mb: u32,
    #[serde(default = "d_2048")]
    pub memory_buffer_mb: u32,
    /// Configured machine type; empty means "size from resources".
    #[serde(default)]
    pub machine_type: String,
    #[serde(default = "d_8")]
    pub max_parallelism: u32,
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    #[serde(default = "d_true")]
    pub prefer_spot: bool,
    #[serde(default = "d_true")]
    pub allow_on_demand_fallback: bool,
    #[serde(default)]
    pub instance_count: Option<u32>,
    #[serde(default)]
    pub workers_per_workflow: Option<u32>,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            vcpu_per_worker: d_1(),
            memory_per_worker_mb: d_2048(),
            memory_buffer_mb: d_2048(),
            machine_type: String::new(),
            max_parallelism: d_8(),
            max_attempts: d_3(),
            prefer_spot: true,
            allow_on_demand_fallback: true,
            instance_count: None,
            workers_per_workflow: None,
        }
    }
}

/// Signed-URL lifetime defaults per dispatcher mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUrlDefaults {
    #[serde(default = "d_48")]
    pub batch_ttl_hours: u32,
    #[serde(default = "d_15")]
    pub cloud_run_ttl_hours: u32,
    #[serde(default = "d_21600")]
    pub refresh_threshold_seconds: u32,
}

impl Default for SignedUrlDefaults {
    fn default() -> Self {
        Self {
            batch_ttl_hours: d_48(),
            cloud_run_ttl_hours: d_15(),
            refresh_threshold_seconds: d_21600(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1() -> u32 {
    1
}
fn d_3() -> u32 {
    3
}
fn d_8() -> u32 {
    8
}
fn d_15() -> u32 {
    15
}
fn d_48() -> u32 {
    48
}
fn d_2048() -> u32 {
    2048
}
fn d_21600() -> u32 {
    21_600
}
fn d_true() -> bool {
    true
}
