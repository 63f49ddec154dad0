//! Config source — read-only view of the "client" and "targeting" sheets.
//!
//! Headers are matched by normalized name (trim + lowercase) with an alias
//! table, so sheet edits that retitle a column keep working. Parsing is
//! split from fetching: the pure functions here take [`SheetTable`]s, and
//! [`ConfigSource`] wires them to the Sheets client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use fso_domain::error::{Error, Result};
use fso_domain::targeting::{
    parse_hhmm, parse_ng_companies, parse_send_days, unescape_template, BatchOverrides,
    ClientProfile, Flag, TargetingConfig, TargetingRow,
};
use fso_google::sheets::{SheetsClient, SheetTable};

/// Aliases accepted for the extra-table column.
const EXTRA_TABLE_ALIASES: &[&str] = &["use_extra_table", "extra", "use extra table"];

/// Row summary returned by the active-targeting listing.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ActiveTargeting {
    pub targeting_id: i64,
    pub client_id: i64,
    pub description: String,
    pub concurrent_workflow: u32,
    pub use_extra_table: bool,
}

/// Defaults applied to blank targeting cells.
#[derive(Clone, Copy, Debug)]
pub struct RowDefaults {
    pub send_end_minutes: u16,
    pub session_max_hours: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Header lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn normalize_header(h: &str) -> String {
    h.trim().to_lowercase()
}

struct ColumnMap {
    by_name: HashMap<String, usize>,
}

impl ColumnMap {
    fn new(headers: &[String]) -> Self {
        let mut by_name = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            by_name.entry(normalize_header(h)).or_insert(i);
        }
        Self { by_name }
    }

    fn col(&self, name: &str) -> Option<usize> {
        self.by_name.get(&normalize_header(name)).copied()
    }

    fn col_aliased(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.col(n))
    }

    fn cell<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        self.col(name)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn cell_aliased<'a>(&self, row: &'a [String], names: &[&str]) -> &'a str {
        self.col_aliased(names)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A row is active iff the cell is `true` (any casing) or `1`.
fn is_active_cell(cell: &str) -> bool {
    let t = cell.trim();
    t.eq_ignore_ascii_case("true") || t == "1"
}

fn parse_i64(cell: &str) -> Option<i64> {
    cell.trim().parse().ok()
}

fn parse_u32_cell(cell: &str) -> Option<u32> {
    let t = cell.trim();
    if t.is_empty() {
        return None;
    }
    t.parse().ok().or_else(|| {
        // Sheets sometimes exports integers as "3.0".
        t.parse::<f64>().ok().and_then(|f| {
            if f.fract() == 0.0 && f >= 0.0 {
                Some(f as u32)
            } else {
                None
            }
        })
    })
}

fn opt_string(cell: &str) -> Option<String> {
    let t = cell.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_owned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure parsers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All active rows of the targeting sheet, in sheet order.
pub fn parse_active_targetings(table: &SheetTable) -> Result<Vec<ActiveTargeting>> {
    let cols = ColumnMap::new(&table.headers);
    if cols.col("targeting_id").is_none() || cols.col("active").is_none() {
        return Err(Error::Sheets(
            "targeting sheet is missing targeting_id/active headers".into(),
        ));
    }

    let mut out = Vec::new();
    for row in &table.rows {
        if !is_active_cell(cols.cell(row, "active")) {
            continue;
        }
        let Some(targeting_id) = parse_i64(cols.cell(row, "targeting_id")) else {
            continue;
        };
        let Some(client_id) = parse_i64(cols.cell(row, "client_id")) else {
            continue;
        };
        out.push(ActiveTargeting {
            targeting_id,
            client_id,
            description: cols.cell(row, "description").trim().to_owned(),
            concurrent_workflow: parse_u32_cell(cols.cell(row, "concurrent_workflow"))
                .filter(|&v| v >= 1)
                .unwrap_or(1),
            use_extra_table: Flag::from_cell(cols.cell_aliased(row, EXTRA_TABLE_ALIASES))
                .is_explicit_true(),
        });
    }
    Ok(out)
}

/// Join one targeting row with its client row and validate the result.
/// Returns `None` when no row matches `targeting_id`.
pub fn parse_targeting_config(
    targeting_table: &SheetTable,
    client_table: &SheetTable,
    targeting_id: i64,
    defaults: RowDefaults,
) -> Result<Option<TargetingConfig>> {
    let tcols = ColumnMap::new(&targeting_table.headers);
    let row = targeting_table
        .rows
        .iter()
        .find(|row| parse_i64(tcols.cell(row, "targeting_id")) == Some(targeting_id));
    let Some(row) = row else {
        return Ok(None);
    };

    // ── Required targeting fields ────────────────────────────────────
    for field in ["client_id", "subject", "message", "max_daily_sends", "send_start_time"] {
        if tcols.cell(row, field).trim().is_empty() {
            return Err(Error::Targeting {
                targeting_id,
                message: format!("required field '{field}' is blank"),
            });
        }
    }

    let client_id = parse_i64(tcols.cell(row, "client_id")).ok_or(Error::Targeting {
        targeting_id,
        message: "client_id is not an integer".into(),
    })?;

    let max_daily_sends =
        parse_u32_cell(tcols.cell(row, "max_daily_sends")).ok_or(Error::Targeting {
            targeting_id,
            message: "max_daily_sends is not an integer".into(),
        })?;

    let send_start_time =
        parse_hhmm(tcols.cell(row, "send_start_time")).ok_or(Error::Targeting {
            targeting_id,
            message: format!(
                "send_start_time '{}' is not HH:MM",
                tcols.cell(row, "send_start_time")
            ),
        })?;
    // End time falls back to the global default when blank or malformed.
    let send_end_time =
        parse_hhmm(tcols.cell(row, "send_end_time")).unwrap_or(defaults.send_end_minutes);

    let session_max_hours = tcols
        .cell(row, "session_max_hours")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|&h| h > 0.0)
        .unwrap_or(defaults.session_max_hours);

    let targeting = TargetingRow {
        targeting_id,
        client_id,
        active: is_active_cell(tcols.cell(row, "active")),
        description: tcols.cell(row, "description").trim().to_owned(),
        subject: unescape_template(tcols.cell(row, "subject")),
        message: unescape_template(tcols.cell(row, "message")),
        targeting_sql: tcols.cell(row, "targeting_sql").trim().to_owned(),
        ng_companies: parse_ng_companies(tcols.cell(row, "ng_companies")),
        max_daily_sends,
        send_start_time,
        send_end_time,
        send_days_of_week: parse_send_days(tcols.cell(row, "send_days_of_week")),
        concurrent_workflow: parse_u32_cell(tcols.cell(row, "concurrent_workflow"))
            .filter(|&v| v >= 1)
            .unwrap_or(1),
        use_extra_table: Flag::from_cell(tcols.cell_aliased(row, EXTRA_TABLE_ALIASES)),
        use_serverless: Flag::from_cell(tcols.cell(row, "use_serverless")),
        use_gcp_batch: Flag::from_cell(tcols.cell(row, "use_gcp_batch")),
        session_max_hours,
        batch: BatchOverrides {
            instance_count: parse_u32_cell(tcols.cell(row, "batch_instance_count")),
            workers_per_workflow: parse_u32_cell(tcols.cell(row, "batch_workers_per_workflow")),
            vcpu_per_worker: parse_u32_cell(tcols.cell(row, "batch_vcpu_per_worker")),
            memory_per_worker_mb: parse_u32_cell(tcols.cell(row, "batch_memory_per_worker_mb")),
            memory_buffer_mb: parse_u32_cell(tcols.cell(row, "batch_memory_buffer_mb")),
            machine_type: opt_string(tcols.cell(row, "batch_machine_type")),
            prefer_spot: opt_string(tcols.cell(row, "batch_prefer_spot"))
                .map(|v| fso_domain::targeting::parse_bool(&v)),
            allow_on_demand_fallback: opt_string(tcols.cell(row, "batch_allow_on_demand_fallback"))
                .map(|v| fso_domain::targeting::parse_bool(&v)),
            max_attempts: parse_u32_cell(tcols.cell(row, "batch_max_attempts")),
        },
    };

    // ── Client join ──────────────────────────────────────────────────
    let ccols = ColumnMap::new(&client_table.headers);
    let client_row = client_table
        .rows
        .iter()
        .find(|row| parse_i64(ccols.cell(row, "client_id")) == Some(client_id))
        .ok_or(Error::ClientData {
            targeting_id,
            message: format!("client {client_id} not found in client sheet"),
        })?;

    let c = |name: &str| ccols.cell(client_row, name).trim().to_owned();
    let client = ClientProfile {
        company_name: c("company_name"),
        name: c("name"),
        last_name: c("last_name"),
        first_name: c("first_name"),
        last_name_kana: c("last_name_kana"),
        first_name_kana: c("first_name_kana"),
        last_name_hiragana: c("last_name_hiragana"),
        first_name_hiragana: c("first_name_hiragana"),
        position: c("position"),
        gender: c("gender"),
        email_local: c("email_local"),
        email_domain: c("email_domain"),
        phone_1: c("phone_1"),
        phone_2: c("phone_2"),
        phone_3: c("phone_3"),
        postal_1: c("postal_1"),
        postal_2: c("postal_2"),
        address_1: c("address_1"),
        address_2: c("address_2"),
        address_3: c("address_3"),
        address_4: c("address_4"),
        department: opt_string(ccols.cell(client_row, "department")),
        website_url: opt_string(ccols.cell(client_row, "website_url")),
        address_5: opt_string(ccols.cell(client_row, "address_5")),
    };

    let config = TargetingConfig { targeting, client };
    config.validate()?;
    Ok(Some(config))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetching wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Seam used by the handlers; [`ConfigSource`] is the sheet-backed
/// implementation.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn list_active_targetings(&self) -> Result<Vec<ActiveTargeting>>;
    async fn get_targeting_config(&self, targeting_id: i64) -> Result<Option<TargetingConfig>>;
}

#[async_trait]
impl ConfigProvider for ConfigSource {
    async fn list_active_targetings(&self) -> Result<Vec<ActiveTargeting>> {
        ConfigSource::list_active_targetings(self).await
    }

    async fn get_targeting_config(&self, targeting_id: i64) -> Result<Option<TargetingConfig>> {
        ConfigSource::get_targeting_config(self, targeting_id).await
    }
}

pub struct ConfigSource {
    sheets: Arc<SheetsClient>,
    spreadsheet_id: String,
    client_sheet: String,
    targeting_sheet: String,
    defaults: RowDefaults,
}

impl ConfigSource {
    pub fn new(
        sheets: Arc<SheetsClient>,
        spreadsheet_id: &str,
        client_sheet: &str,
        targeting_sheet: &str,
        defaults: RowDefaults,
    ) -> Self {
        Self {
            sheets,
            spreadsheet_id: spreadsheet_id.to_owned(),
            client_sheet: client_sheet.to_owned(),
            targeting_sheet: targeting_sheet.to_owned(),
            defaults,
        }
    }

    pub async fn list_active_targetings(&self) -> Result<Vec<ActiveTargeting>> {
        let table = self
            .sheets
            .read_table(&self.spreadsheet_id, &self.targeting_sheet)
            .await?;
        parse_active_targetings(&table)
    }

    pub async fn get_targeting_config(
        &self,
        targeting_id: i64,
    ) -> Result<Option<TargetingConfig>> {
        let targeting = self
            .sheets
            .read_table(&self.spreadsheet_id, &self.targeting_sheet)
            .await?;
        let client = self
            .sheets
            .read_table(&self.spreadsheet_id, &self.client_sheet)
            .await?;
        parse_targeting_config(&targeting, &client, targeting_id, self.defaults)
    }

    pub fn defaults(&self) -> RowDefaults {
        self.defaults
    }
}
