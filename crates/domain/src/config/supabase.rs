use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supabase connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub base_url: String,
    /// Environment variable holding the service-role key.
    #[serde(default = "d_key_env")]
    pub service_role_key_env: String,
    /// HTTP timeout; must exceed the longest statement_timeout hint (180 s).
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// `statement_timeout` hint sent with the full-queue RPC.
    #[serde(default = "d_full_stmt_timeout")]
    pub full_statement_timeout_ms: u64,
    /// `statement_timeout` hint sent with step RPCs.
    #[serde(default = "d_step_stmt_timeout")]
    pub step_statement_timeout_ms: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            service_role_key_env: d_key_env(),
            timeout_ms: d_timeout_ms(),
            full_statement_timeout_ms: d_full_stmt_timeout(),
            step_statement_timeout_ms: d_step_stmt_timeout(),
        }
    }
}

fn d_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".into()
}
fn d_timeout_ms() -> u64 {
    190_000
}
fn d_full_stmt_timeout() -> u64 {
    180_000
}
fn d_step_stmt_timeout() -> u64 {
    120_000
}
