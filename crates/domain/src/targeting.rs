//! Targeting model — the joined view of one targeting row and its client.
//!
//! `TargetingConfig` is fetched on demand from the two configuration sheets
//! and is immutable for the duration of an invocation. Field parsing and
//! validation live here so the config source stays a thin join layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tri-state flag
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-targeting boolean that distinguishes "explicitly set" from "absent".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Explicit(bool),
    #[default]
    Unset,
}

impl Flag {
    /// The flag value with a global default applied when unset.
    pub fn effective(self, default: bool) -> bool {
        match self {
            Flag::Explicit(v) => v,
            Flag::Unset => default,
        }
    }

    /// True only when explicitly set to true.
    pub fn is_explicit_true(self) -> bool {
        matches!(self, Flag::Explicit(true))
    }

    pub fn from_cell(cell: &str) -> Flag {
        let t = cell.trim();
        if t.is_empty() {
            return Flag::Unset;
        }
        Flag::Explicit(parse_bool(t))
    }
}

/// Boolean parsing for flags and properties: `true|1|yes|on`, case-insensitive.
pub fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client profile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sender identity referenced by one or more targetings.
///
/// All fields except `department`, `website_url`, and `address_5` are
/// required and must be non-blank.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub company_name: String,
    /// Full display name.
    pub name: String,
    pub last_name: String,
    pub first_name: String,
    pub last_name_kana: String,
    pub first_name_kana: String,
    pub last_name_hiragana: String,
    pub first_name_hiragana: String,
    pub position: String,
    pub gender: String,
    pub email_local: String,
    pub email_domain: String,
    pub phone_1: String,
    pub phone_2: String,
    pub phone_3: String,
    pub postal_1: String,
    pub postal_2: String,
    pub address_1: String,
    pub address_2: String,
    pub address_3: String,
    pub address_4: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub address_5: Option<String>,
}

impl ClientProfile {
    /// The 21 required fields, paired with their column names.
    pub fn required_fields(&self) -> [(&'static str, &str); 21] {
        [
            ("company_name", &self.company_name),
            ("name", &self.name),
            ("last_name", &self.last_name),
            ("first_name", &self.first_name),
            ("last_name_kana", &self.last_name_kana),
            ("first_name_kana", &self.first_name_kana),
            ("last_name_hiragana", &self.last_name_hiragana),
            ("first_name_hiragana", &self.first_name_hiragana),
            ("position", &self.position),
            ("gender", &self.gender),
            ("email_local", &self.email_local),
            ("email_domain", &self.email_domain),
            ("phone_1", &self.phone_1),
            ("phone_2", &self.phone_2),
            ("phone_3", &self.phone_3),
            ("postal_1", &self.postal_1),
            ("postal_2", &self.postal_2),
            ("address_1", &self.address_1),
            ("address_2", &self.address_2),
            ("address_3", &self.address_3),
            ("address_4", &self.address_4),
        ]
    }

    /// Names of required fields that are blank.
    pub fn blank_fields(&self) -> Vec<&'static str> {
        self.required_fields()
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Targeting row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upper bound on the daily queue size; the queue RPCs also cap here.
pub const MAX_DAILY_SENDS_CAP: u32 = 10_000;

/// Per-targeting Cloud-Batch overrides. All optional; global defaults apply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOverrides {
    #[serde(default)]
    pub instance_count: Option<u32>,
    #[serde(default)]
    pub workers_per_workflow: Option<u32>,
    #[serde(default)]
    pub vcpu_per_worker: Option<u32>,
    #[serde(default)]
    pub memory_per_worker_mb: Option<u32>,
    #[serde(default)]
    pub memory_buffer_mb: Option<u32>,
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub prefer_spot: Option<bool>,
    #[serde(default)]
    pub allow_on_demand_fallback: Option<bool>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// One campaign row binding a message template, SQL filter, NG list,
/// send window, and schedule to a client identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetingRow {
    pub targeting_id: i64,
    pub client_id: i64,
    pub active: bool,
    #[serde(default)]
    pub description: String,
    pub subject: String,
    pub message: String,
    /// WHERE-fragment appended to the company query. Empty allowed.
    #[serde(default)]
    pub targeting_sql: String,
    /// Company names excluded from the queue.
    #[serde(default)]
    pub ng_companies: Vec<String>,
    pub max_daily_sends: u32,
    /// Minutes from midnight JST.
    pub send_start_time: u16,
    /// Minutes from midnight JST; defaults to 18:00 when the cell is blank.
    pub send_end_time: u16,
    /// Sheet day-of-week numbering: 0 = Monday .. 6 = Sunday.
    pub send_days_of_week: BTreeSet<u8>,
    pub concurrent_workflow: u32,
    pub use_extra_table: Flag,
    pub use_serverless: Flag,
    pub use_gcp_batch: Flag,
    /// Hours before the session auto-stops.
    pub session_max_hours: f64,
    #[serde(default)]
    pub batch: BatchOverrides,
}

/// Joined view of one targeting row and the referenced client row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetingConfig {
    pub targeting: TargetingRow,
    pub client: ClientProfile,
}

impl TargetingConfig {
    /// Validate the joined row against the model invariants.
    pub fn validate(&self) -> Result<()> {
        let id = self.targeting.targeting_id;
        let blank = self.client.blank_fields();
        if !blank.is_empty() {
            return Err(Error::ClientData {
                targeting_id: id,
                message: format!("required client fields blank: {}", blank.join(", ")),
            });
        }
        if self.targeting.use_extra_table.is_explicit_true()
            && self.client.company_name.trim().is_empty()
        {
            return Err(Error::ClientData {
                targeting_id: id,
                message: "use_extra_table requires client.company_name".into(),
            });
        }
        if self.targeting.max_daily_sends == 0
            || self.targeting.max_daily_sends > MAX_DAILY_SENDS_CAP
        {
            return Err(Error::Targeting {
                targeting_id: id,
                message: format!(
                    "max_daily_sends must be in 1..={MAX_DAILY_SENDS_CAP}, got {}",
                    self.targeting.max_daily_sends
                ),
            });
        }
        if self.targeting.concurrent_workflow == 0 {
            return Err(Error::Targeting {
                targeting_id: id,
                message: "concurrent_workflow must be >= 1".into(),
            });
        }
        if self.targeting.session_max_hours <= 0.0 {
            return Err(Error::Targeting {
                targeting_id: id,
                message: "session_max_hours must be > 0".into(),
            });
        }
        if let Some(&d) = self.targeting.send_days_of_week.iter().find(|&&d| d > 6) {
            return Err(Error::Targeting {
                targeting_id: id,
                message: format!("send_days_of_week contains invalid day {d}"),
            });
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cell parsing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `HH:MM` into minutes from midnight. `None` when malformed or out
/// of the `[00:00..23:59]` range.
pub fn parse_hhmm(s: &str) -> Option<u16> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Format minutes from midnight back into `HH:MM`.
pub fn format_hhmm(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Default send window end: 18:00 JST.
pub const DEFAULT_SEND_END_MINUTES: u16 = 18 * 60;

/// Default send days `{0,1,2,3,4}` — Monday..Friday in the sheet's
/// 0 = Monday numbering.
pub fn default_send_days() -> BTreeSet<u8> {
    [0u8, 1, 2, 3, 4].into_iter().collect()
}

/// Parse a comma-separated day-of-week cell (0 = Monday .. 6 = Sunday).
///
/// Values outside `0..=6` are filtered out; any malformed token, or an
/// empty result, falls back to the default weekday set `{0,1,2,3,4}`.
pub fn parse_send_days(s: &str) -> BTreeSet<u8> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return default_send_days();
    }
    let mut out = BTreeSet::new();
    for token in trimmed.split([',', '，']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<u8>() {
            Ok(d) if d <= 6 => {
                out.insert(d);
            }
            Ok(_) => {} // out of range: filtered
            Err(_) => return default_send_days(),
        }
    }
    if out.is_empty() {
        default_send_days()
    } else {
        out
    }
}

/// Split an NG-company cell on ASCII and full-width commas.
pub fn parse_ng_companies(s: &str) -> Vec<String> {
    s.split([',', '，', '、'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Unescape literal `\n`, `\t`, `\r` sequences inside subject/message cells.
pub fn unescape_template(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('r') => {
                    chars.next();
                    out.push('\r');
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_client() -> ClientProfile {
        ClientProfile {
            company_name: "株式会社サンプル".into(),
            name: "山田 太郎".into(),
            last_name: "山田".into(),
            first_name: "太郎".into(),
            last_name_kana: "ヤマダ".into(),
            first_name_kana: "タロウ".into(),
            last_name_hiragana: "やまだ".into(),
            first_name_hiragana: "たろう".into(),
            position: "部長".into(),
            gender: "男性".into(),
            email_local: "taro".into(),
            email_domain: "example.co.jp".into(),
            phone_1: "03".into(),
            phone_2: "1234".into(),
            phone_3: "5678".into(),
            postal_1: "100".into(),
            postal_2: "0001".into(),
            address_1: "東京都".into(),
            address_2: "千代田区".into(),
            address_3: "1-1".into(),
            address_4: "サンプルビル".into(),
            department: None,
            website_url: None,
            address_5: None,
        }
    }

    pub(crate) fn sample_row() -> TargetingRow {
        TargetingRow {
            targeting_id: 1,
            client_id: 1,
            active: true,
            description: "test campaign".into(),
            subject: "hello".into(),
            message: "body".into(),
            targeting_sql: String::new(),
            ng_companies: vec![],
            max_daily_sends: 500,
            send_start_time: 9 * 60,
            send_end_time: DEFAULT_SEND_END_MINUTES,
            send_days_of_week: default_send_days(),
            concurrent_workflow: 1,
            use_extra_table: Flag::Unset,
            use_serverless: Flag::Unset,
            use_gcp_batch: Flag::Unset,
            session_max_hours: 8.0,
            batch: BatchOverrides::default(),
        }
    }

    #[test]
    fn hhmm_round_trip() {
        for s in ["00:00", "07:00", "13:05", "18:00", "23:59"] {
            let minutes = parse_hhmm(s).unwrap();
            assert_eq!(format_hhmm(minutes), s);
        }
    }

    #[test]
    fn hhmm_rejects_malformed() {
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("noon"), None);
        assert_eq!(parse_hhmm(""), None);
        assert_eq!(parse_hhmm("9"), None);
    }

    #[test]
    fn send_days_filters_and_defaults() {
        assert_eq!(
            parse_send_days("1,2,3"),
            [1u8, 2, 3].into_iter().collect::<BTreeSet<_>>()
        );
        // Out-of-range values filtered, valid kept.
        assert_eq!(
            parse_send_days("1,9,2"),
            [1u8, 2].into_iter().collect::<BTreeSet<_>>()
        );
        // Malformed token → full default.
        assert_eq!(parse_send_days("mon,tue"), default_send_days());
        assert_eq!(parse_send_days(""), default_send_days());
        // All filtered out → default.
        assert_eq!(parse_send_days("7,8,9"), default_send_days());
    }

    #[test]
    fn ng_companies_split_both_commas() {
        assert_eq!(
            parse_ng_companies("A社, B社，C社、 D社"),
            vec!["A社", "B社", "C社", "D社"]
        );
        assert!(parse_ng_companies("").is_empty());
        assert!(parse_ng_companies(" , ，").is_empty());
    }

    #[test]
    fn unescape_handles_all_sequences() {
        assert_eq!(unescape_template("a\\nb\\tc\\rd"), "a\nb\tc\rd");
        assert_eq!(unescape_template("no escapes"), "no escapes");
        // Unknown escape passes through untouched.
        assert_eq!(unescape_template("a\\xb"), "a\\xb");
        // Trailing backslash preserved.
        assert_eq!(unescape_template("a\\"), "a\\");
    }

    #[test]
    fn flag_tri_state() {
        assert_eq!(Flag::from_cell(""), Flag::Unset);
        assert_eq!(Flag::from_cell("TRUE"), Flag::Explicit(true));
        assert_eq!(Flag::from_cell("1"), Flag::Explicit(true));
        assert_eq!(Flag::from_cell("no"), Flag::Explicit(false));
        assert!(Flag::Unset.effective(true));
        assert!(!Flag::Explicit(false).effective(true));
        assert!(Flag::Explicit(true).is_explicit_true());
        assert!(!Flag::Unset.is_explicit_true());
    }

    #[test]
    fn valid_config_passes() {
        let cfg = TargetingConfig {
            targeting: sample_row(),
            client: sample_client(),
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn blank_client_field_fails() {
        let mut client = sample_client();
        client.phone_2 = "  ".into();
        let cfg = TargetingConfig {
            targeting: sample_row(),
            client,
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, Error::ClientData { .. }));
        assert!(err.to_string().contains("phone_2"));
    }

    #[test]
    fn max_daily_sends_bounds() {
        let mut row = sample_row();
        row.max_daily_sends = 0;
        let err = TargetingConfig {
            targeting: row,
            client: sample_client(),
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, Error::Targeting { .. }));

        let mut row = sample_row();
        row.max_daily_sends = MAX_DAILY_SENDS_CAP + 1;
        assert!(TargetingConfig {
            targeting: row,
            client: sample_client(),
        }
        .validate()
        .is_err());
    }

    #[test]
    fn required_field_count_is_21() {
        assert_eq!(sample_client().required_fields().len(), 21);
    }
}
