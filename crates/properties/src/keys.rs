//! Property-key names.
//!
//! These strings are an operator-facing contract: external tooling reads
//! and seeds them, so they are pinned here rather than derived.

/// Per-targeting daily run-index counter state (JSON `{date, counter, updated_at}`).
pub fn run_index_state(targeting_id: i64) -> String {
    format!("FORM_SENDER_RUN_INDEX_BASE__{targeting_id}__STATE")
}

/// Merged auto-stop schedule (JSON `{version: 1, entries: […]}`).
pub const AUTO_STOP_SCHEDULE: &str = "FORM_SENDER_AUTO_STOP_SCHEDULE_V1";

/// Trigger id of the single pending auto-stop trigger.
pub const AUTO_STOP_TRIGGER_ID: &str = "FORM_SENDER_AUTO_STOP_TRIGGER_ID";

/// Info record for the currently running session.
pub const ACTIVE_SESSION_INFO: &str = "FORM_SENDER_ACTIVE_SESSION_INFO";

/// Handler → one-shot trigger map (JSON list).
pub const TRIGGERS: &str = "FORM_SENDER_TRIGGERS_V1";

// ── Operator overrides (optional; config-file defaults apply) ───────

pub const USE_GCP_BATCH: &str = "USE_GCP_BATCH";
pub const USE_SERVERLESS: &str = "USE_SERVERLESS_FORM_SENDER";
pub const PARALLELISM_OVERRIDE: &str = "FORM_SENDER_PARALLELISM_OVERRIDE";
pub const WORKERS_OVERRIDE: &str = "FORM_SENDER_WORKERS_OVERRIDE";
pub const SHARD_COUNT: &str = "FORM_SENDER_SHARD_COUNT";
pub const BATCH_INSTANCE_COUNT: &str = "FORM_SENDER_BATCH_INSTANCE_COUNT";
pub const BATCH_WORKERS_PER_WORKFLOW: &str = "FORM_SENDER_BATCH_WORKERS_PER_WORKFLOW";
pub const MACHINE_TYPE_OVERRIDE: &str = "FORM_SENDER_MACHINE_TYPE_OVERRIDE";
pub const MAX_PARALLELISM: &str = "FORM_SENDER_MAX_PARALLELISM";
pub const DEFAULT_SESSION_HOURS: &str = "FORM_SENDER_DEFAULT_SESSION_HOURS";
pub const SIGNED_URL_TTL_HOURS: &str = "FORM_SENDER_SIGNED_URL_TTL_HOURS";
pub const SIGNED_URL_REFRESH_THRESHOLD: &str =
    "FORM_SENDER_SIGNED_URL_REFRESH_THRESHOLD_SECONDS";
