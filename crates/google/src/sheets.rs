//! Sheets range reads for the configuration spreadsheet.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Deserialize;

use fso_domain::error::{Error, Result};

use crate::auth::{scopes, TokenProvider};

/// One sheet as headers + data rows. Cells are stringified; short rows are
/// padded so every row has a cell per header.
#[derive(Clone, Debug, Default)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct SheetsClient {
    http: Client,
    endpoint: String,
    token: Arc<TokenProvider>,
}

impl SheetsClient {
    pub fn new(endpoint: &str, token: Arc<TokenProvider>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token,
        })
    }

    /// Read an entire sheet as a [`SheetTable`] (first row = headers).
    pub async fn read_table(&self, spreadsheet_id: &str, sheet: &str) -> Result<SheetTable> {
        let url = format!(
            "{}/spreadsheets/{}/values/{}?majorDimension=ROWS",
            self.endpoint,
            spreadsheet_id,
            utf8_percent_encode(sheet, NON_ALPHANUMERIC),
        );
        let token = self.token.access_token(scopes::SHEETS_RO).await?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Sheets(format!(
                "reading sheet {sheet} returned {status}: {body}"
            )));
        }
        let values: ValuesResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(table_from_values(values.values))
    }
}

fn cell_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn table_from_values(values: Vec<Vec<serde_json::Value>>) -> SheetTable {
    let mut iter = values.into_iter();
    let headers: Vec<String> = iter
        .next()
        .unwrap_or_default()
        .iter()
        .map(cell_to_string)
        .collect();
    let width = headers.len();
    let rows = iter
        .map(|row| {
            let mut cells: Vec<String> = row.iter().map(cell_to_string).collect();
            cells.resize(width.max(cells.len()), String::new());
            cells
        })
        .collect();
    SheetTable { headers, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_pads_short_rows() {
        let table = table_from_values(vec![
            vec![json!("a"), json!("b"), json!("c")],
            vec![json!("1")],
            vec![json!(2), json!(true), json!(null)],
        ]);
        assert_eq!(table.headers, vec!["a", "b", "c"]);
        assert_eq!(table.rows[0], vec!["1", "", ""]);
        assert_eq!(table.rows[1], vec!["2", "true", ""]);
    }

    #[test]
    fn empty_sheet_yields_empty_table() {
        let table = table_from_values(vec![]);
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
    }
}
