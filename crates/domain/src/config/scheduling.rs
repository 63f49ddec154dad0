use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduling defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Hours a session may run before the max-runtime auto-stop.
    #[serde(default = "d_session_hours")]
    pub default_session_hours: f64,
    /// Send-window end applied when the targeting row leaves it blank.
    #[serde(default = "d_send_end")]
    pub default_send_end_time: String,
    /// Floor between "now" and any auto-stop trigger.
    #[serde(default = "d_min_delay_ms")]
    pub auto_stop_min_delay_ms: u64,
    /// Hours at which the daily launch triggers fire (JST).
    #[serde(default = "d_trigger_hours")]
    pub trigger_hours: Vec<u32>,
    /// Trigger-runner tick interval in `serve` mode.
    #[serde(default = "d_tick_secs")]
    pub tick_interval_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            default_session_hours: d_session_hours(),
            default_send_end_time: d_send_end(),
            auto_stop_min_delay_ms: d_min_delay_ms(),
            trigger_hours: d_trigger_hours(),
            tick_interval_secs: d_tick_secs(),
        }
    }
}

fn d_session_hours() -> f64 {
    8.0
}
fn d_send_end() -> String {
    "18:00".into()
}
fn d_min_delay_ms() -> u64 {
    60_000
}
fn d_trigger_hours() -> Vec<u32> {
    vec![7, 13]
}
fn d_tick_secs() -> u64 {
    30
}
