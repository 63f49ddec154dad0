use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Google services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Path to the service-account JSON key file.
    #[serde(default)]
    pub service_account_path: PathBuf,
    /// Bucket receiving client-config artifacts.
    #[serde(default)]
    pub bucket: String,
    /// Full Cloud Tasks queue path: `projects/{p}/locations/{l}/queues/{q}`.
    #[serde(default)]
    pub tasks_queue_path: String,
    /// Configuration spreadsheet holding the client and targeting sheets.
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default = "d_client_sheet")]
    pub client_sheet: String,
    #[serde(default = "d_targeting_sheet")]
    pub targeting_sheet: String,
    /// Public holiday calendar queried for the business-day predicate.
    #[serde(default = "d_holiday_calendar")]
    pub holiday_calendar_id: String,
    #[serde(default = "d_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "d_storage_endpoint")]
    pub storage_endpoint: String,
    #[serde(default = "d_tasks_endpoint")]
    pub tasks_endpoint: String,
    #[serde(default = "d_sheets_endpoint")]
    pub sheets_endpoint: String,
    #[serde(default = "d_calendar_endpoint")]
    pub calendar_endpoint: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            service_account_path: PathBuf::new(),
            bucket: String::new(),
            tasks_queue_path: String::new(),
            spreadsheet_id: String::new(),
            client_sheet: d_client_sheet(),
            targeting_sheet: d_targeting_sheet(),
            holiday_calendar_id: d_holiday_calendar(),
            token_endpoint: d_token_endpoint(),
            storage_endpoint: d_storage_endpoint(),
            tasks_endpoint: d_tasks_endpoint(),
            sheets_endpoint: d_sheets_endpoint(),
            calendar_endpoint: d_calendar_endpoint(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_client_sheet() -> String {
    "client".into()
}
fn d_targeting_sheet() -> String {
    "targeting".into()
}
fn d_holiday_calendar() -> String {
    "ja.japanese#holiday@group.v.calendar.google.com".into()
}
fn d_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn d_storage_endpoint() -> String {
    "https://storage.googleapis.com".into()
}
fn d_tasks_endpoint() -> String {
    "https://cloudtasks.googleapis.com/v2".into()
}
fn d_sheets_endpoint() -> String {
    "https://sheets.googleapis.com/v4".into()
}
fn d_calendar_endpoint() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn d_timeout_ms() -> u64 {
    30_000
}
