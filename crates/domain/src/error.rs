//! Shared error type and the public error taxonomy.
//!
//! Every public operation reports failures through [`ErrorKind`], a small
//! fixed vocabulary of error codes. Structured variants map to their kind
//! directly; free-form messages (RPC bodies, HTTP payloads) go through
//! [`classify`], a case-insensitive substring matcher that understands both
//! English and Japanese error text.

use serde::{Deserialize, Serialize};

/// Shared error type used across all formsender crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rpc {procedure}: {message}")]
    Rpc { procedure: String, message: String },

    #[error("rpc {procedure}: statement timeout")]
    StatementTimeout { procedure: String },

    #[error("storage: {0}")]
    Storage(String),

    #[error("dispatcher: {0}")]
    Dispatcher(String),

    #[error("github: {0}")]
    Github(String),

    #[error("sheets: {0}")]
    Sheets(String),

    #[error("config: {0}")]
    Config(String),

    #[error("targeting {targeting_id}: {message}")]
    Targeting { targeting_id: i64, message: String },

    #[error("client data (targeting {targeting_id}): {message}")]
    ClientData { targeting_id: i64, message: String },

    #[error("auth: {0}")]
    Auth(String),

    /// Lock acquisition timed out (run-index allocation mutex).
    #[error("busy: {0}")]
    Busy(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The taxonomy code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Sheets(_) => ErrorKind::SpreadsheetConfig,
            Error::Github(_) => ErrorKind::GithubApi,
            Error::Targeting { .. } => ErrorKind::TargetingConfig,
            Error::ClientData { .. } => ErrorKind::ClientData,
            Error::Json(_) => ErrorKind::JsonParse,
            Error::Http(_) | Error::Timeout(_) => ErrorKind::Network,
            Error::Auth(_) => ErrorKind::Permission,
            Error::Config(m) | Error::Other(m) | Error::Storage(m) | Error::Dispatcher(m) => {
                classify(m)
            }
            Error::Rpc { message, .. } => classify(message),
            Error::StatementTimeout { .. } => ErrorKind::Network,
            Error::Io(_) | Error::Busy(_) => ErrorKind::System,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Public error codes returned as `error_type` in operation results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "SPREADSHEET_CONFIG_ERROR")]
    SpreadsheetConfig,
    #[serde(rename = "GITHUB_API_ERROR")]
    GithubApi,
    #[serde(rename = "TARGETING_CONFIG_ERROR")]
    TargetingConfig,
    #[serde(rename = "CLIENT_DATA_ERROR")]
    ClientData,
    #[serde(rename = "JSON_PARSE_ERROR")]
    JsonParse,
    #[serde(rename = "BUSINESS_HOURS_ERROR")]
    BusinessHours,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "PERMISSION_ERROR")]
    Permission,
    #[serde(rename = "SYSTEM_ERROR")]
    System,
    /// Dispatcher rejected the client configuration during pre-flight.
    #[serde(rename = "validation_failed")]
    ValidationFailed,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::SpreadsheetConfig => "SPREADSHEET_CONFIG_ERROR",
            ErrorKind::GithubApi => "GITHUB_API_ERROR",
            ErrorKind::TargetingConfig => "TARGETING_CONFIG_ERROR",
            ErrorKind::ClientData => "CLIENT_DATA_ERROR",
            ErrorKind::JsonParse => "JSON_PARSE_ERROR",
            ErrorKind::BusinessHours => "BUSINESS_HOURS_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Permission => "PERMISSION_ERROR",
            ErrorKind::System => "SYSTEM_ERROR",
            ErrorKind::ValidationFailed => "validation_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Classify foreign error text into a taxonomy code.
///
/// Match order is significant: the first vocabulary group containing a
/// matching substring wins, and unmatched text falls through to
/// [`ErrorKind::System`].
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["permission", "unauthorized", "forbidden", "権限", "アクセス拒否"]) {
        ErrorKind::Permission
    } else if has(&["spreadsheet", "sheet not found", "シート", "スプレッドシート"]) {
        ErrorKind::SpreadsheetConfig
    } else if has(&["github", "workflow_dispatch", "rate limit"]) {
        ErrorKind::GithubApi
    } else if has(&["targeting", "ターゲティング"]) {
        ErrorKind::TargetingConfig
    } else if has(&["client", "クライアント", "必須項目"]) {
        ErrorKind::ClientData
    } else if has(&["json", "unexpected token", "構文エラー"]) {
        ErrorKind::JsonParse
    } else if has(&["business hours", "営業時間", "送信時間外"]) {
        ErrorKind::BusinessHours
    } else if has(&["network", "timeout", "timed out", "connection", "接続", "タイムアウト"]) {
        ErrorKind::Network
    } else {
        ErrorKind::System
    }
}

/// Does this error text describe a Postgres statement timeout?
///
/// Matches SQLSTATE `57014` and the two message spellings the server
/// emits, case-insensitively.
pub fn is_statement_timeout(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("57014")
        || lower.contains("statement timeout")
        || lower.contains("canceling statement")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_english_vocabulary() {
        assert_eq!(classify("GitHub API error 502"), ErrorKind::GithubApi);
        assert_eq!(classify("Unexpected token < in JSON"), ErrorKind::JsonParse);
        assert_eq!(classify("request timed out"), ErrorKind::Network);
        assert_eq!(classify("403 Forbidden"), ErrorKind::Permission);
        assert_eq!(classify("Spreadsheet ID missing"), ErrorKind::SpreadsheetConfig);
        assert_eq!(classify("targeting row 9 invalid"), ErrorKind::TargetingConfig);
        assert_eq!(classify("client field empty"), ErrorKind::ClientData);
        assert_eq!(classify("outside business hours"), ErrorKind::BusinessHours);
    }

    #[test]
    fn classify_japanese_vocabulary() {
        assert_eq!(classify("シートが見つかりません"), ErrorKind::SpreadsheetConfig);
        assert_eq!(classify("クライアントの必須項目が空です"), ErrorKind::ClientData);
        assert_eq!(classify("接続に失敗しました"), ErrorKind::Network);
        assert_eq!(classify("権限がありません"), ErrorKind::Permission);
        assert_eq!(classify("営業時間外です"), ErrorKind::BusinessHours);
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(classify("GITHUB api failure"), ErrorKind::GithubApi);
        assert_eq!(classify("Statement TIMEOUT reached"), ErrorKind::Network);
    }

    #[test]
    fn classify_unknown_defaults_to_system() {
        assert_eq!(classify("something odd happened"), ErrorKind::System);
        assert_eq!(classify(""), ErrorKind::System);
    }

    #[test]
    fn statement_timeout_patterns() {
        assert!(is_statement_timeout("ERROR: 57014"));
        assert!(is_statement_timeout("canceling statement due to statement timeout"));
        assert!(is_statement_timeout("Statement Timeout"));
        assert!(!is_statement_timeout("connection reset by peer"));
    }

    #[test]
    fn structured_variants_map_directly() {
        let e = Error::Sheets("missing header".into());
        assert_eq!(e.kind(), ErrorKind::SpreadsheetConfig);
        let e = Error::Github("dispatch failed".into());
        assert_eq!(e.kind(), ErrorKind::GithubApi);
        let e = Error::Targeting { targeting_id: 3, message: "bad row".into() };
        assert_eq!(e.kind(), ErrorKind::TargetingConfig);
        let e = Error::ClientData { targeting_id: 3, message: "blank field".into() };
        assert_eq!(e.kind(), ErrorKind::ClientData);
        let e = Error::Timeout("25s elapsed".into());
        assert_eq!(e.kind(), ErrorKind::Network);
        let e = Error::Auth("bad token".into());
        assert_eq!(e.kind(), ErrorKind::Permission);
    }

    #[test]
    fn error_kind_codes_round_trip_serde() {
        let json = serde_json::to_string(&ErrorKind::SpreadsheetConfig).unwrap();
        assert_eq!(json, "\"SPREADSHEET_CONFIG_ERROR\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::SpreadsheetConfig);

        let json = serde_json::to_string(&ErrorKind::ValidationFailed).unwrap();
        assert_eq!(json, "\"validation_failed\"");
    }
}
