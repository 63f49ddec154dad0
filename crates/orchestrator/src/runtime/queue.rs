//! Daily work-queue building.
//!
//! The fast path asks the database to materialize the whole queue in one
//! stored-procedure call. When that call dies of a statement timeout, the
//! builder switches to a chunked loop driven by [`ChunkController`]: a
//! state machine over `{limit, id_window, stage, after_id, total}` that
//! grows the page size while steps are fast, halves it (then the ID window)
//! on timeouts, and stops at the row cap, the wall-clock budget, or the
//! per-stage iteration guard.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fso_domain::config::SupabaseConfig;
use fso_domain::error::{Error, ErrorKind, Result};
use fso_rpc::RpcCaller;

/// Row cap applied by the queue procedures regardless of `max_daily_sends`.
pub const QUEUE_CAP: u32 = 10_000;
/// Wall-clock budget for the chunked fallback.
pub const CHUNK_TIME_BUDGET_MS: u64 = 240_000;

const INITIAL_LIMIT: u32 = 2_000;
const MIN_LIMIT: u32 = 250;
const MAX_LIMIT: u32 = 4_000;
const INITIAL_ID_WINDOW: i64 = 50_000;
const MIN_ID_WINDOW: i64 = 10_000;
/// Steps faster than this grow the limit.
const FAST_STEP_MS: u64 = 3_000;
const TIMEOUT_RETRY_SLEEP_MS: u64 = 500;
const MAX_STEPS_PER_STAGE: u32 = 100;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table variants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableVariant {
    Primary,
    Extra,
    Test,
}

impl TableVariant {
    /// Test mode overrides the extra-table flag.
    pub fn resolve(test_mode: bool, use_extra: bool) -> Self {
        if test_mode {
            TableVariant::Test
        } else if use_extra {
            TableVariant::Extra
        } else {
            TableVariant::Primary
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            TableVariant::Primary => "",
            TableVariant::Extra => "_extra",
            TableVariant::Test => "_test",
        }
    }

    pub fn send_queue_table(&self) -> &'static str {
        match self {
            TableVariant::Primary => "send_queue",
            TableVariant::Extra => "send_queue_extra",
            TableVariant::Test => "send_queue_test",
        }
    }

    pub fn company_table(&self) -> &'static str {
        match self {
            TableVariant::Extra => "companies_extra",
            _ => "companies",
        }
    }

    pub fn submissions_table(&self) -> Option<&'static str> {
        match self {
            TableVariant::Test => Some("submissions_test"),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a completed step told the controller to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAdvance {
    /// Keep stepping in the current stage.
    Continue,
    /// The stage's ID space is exhausted.
    StageDone,
}

#[derive(Clone, Copy, Debug)]
pub struct ChunkController {
    pub limit: u32,
    pub id_window: i64,
    pub after_id: i64,
    pub stage: u8,
    pub total: u32,
    pub steps_in_stage: u32,
}

impl ChunkController {
    pub fn new() -> Self {
        Self {
            limit: INITIAL_LIMIT,
            id_window: INITIAL_ID_WINDOW,
            after_id: 0,
            stage: 1,
            total: 0,
            steps_in_stage: 0,
        }
    }

    /// Start a stage: the ID cursor restarts, adaptive sizes carry over.
    pub fn begin_stage(&mut self, stage: u8) {
        self.stage = stage;
        self.after_id = 0;
        self.steps_in_stage = 0;
    }

    /// Apply a successful step.
    pub fn record_success(
        &mut self,
        inserted: u32,
        last_id: i64,
        has_more: bool,
        elapsed_ms: u64,
    ) -> StepAdvance {
        self.steps_in_stage += 1;
        self.total += inserted;

        let window_start = self.after_id;
        self.after_id = if has_more {
            last_id.max(window_start)
        } else {
            window_start + self.id_window
        };

        if elapsed_ms < FAST_STEP_MS && self.limit < MAX_LIMIT {
            self.limit = MAX_LIMIT.min(self.limit * 5 / 4);
        }

        if !has_more && inserted == 0 {
            StepAdvance::StageDone
        } else {
            StepAdvance::Continue
        }
    }

    /// Apply a statement timeout: halve the limit down to its minimum,
    /// then the ID window down to its minimum. Errors when both floors
    /// are already reached.
    pub fn record_timeout(&mut self) -> Result<()> {
        self.steps_in_stage += 1;
        if self.limit > MIN_LIMIT {
            self.limit = MIN_LIMIT.max(self.limit / 2);
        } else if self.id_window > MIN_ID_WINDOW {
            self.id_window = MIN_ID_WINDOW.max(self.id_window / 2);
        } else {
            return Err(Error::Other(
                "queue step kept timing out at minimum limit and id_window".into(),
            ));
        }
        Ok(())
    }

    pub fn row_cap_reached(&self) -> bool {
        self.total >= QUEUE_CAP
    }

    pub fn stage_guard_tripped(&self) -> bool {
        self.steps_in_stage >= MAX_STEPS_PER_STAGE
    }
}

impl Default for ChunkController {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Build requests / outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug)]
pub struct QueueBuildRequest {
    pub targeting_id: i64,
    pub target_date: NaiveDate,
    pub targeting_sql: String,
    pub ng_companies: Vec<String>,
    pub client_name: String,
    pub use_extra: bool,
    pub test_mode: bool,
    pub shards: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueBuildOutcome {
    pub success: bool,
    pub inserted_total: u32,
    pub fallback_used: bool,
    pub time_budget_exceeded: bool,
    pub steps: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkDetail {
    pub targeting_id: i64,
    pub success: bool,
    pub inserted: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkOutcome {
    pub success: bool,
    pub processed: u32,
    pub failed: u32,
    pub inserted_total: u32,
    pub details: Vec<BulkDetail>,
}

#[derive(Deserialize)]
struct StepResult {
    inserted: u32,
    last_id: i64,
    has_more: bool,
}

fn parse_step_result(value: serde_json::Value) -> Result<StepResult> {
    // Set-returning procedures come back as a one-row array.
    let value = match value {
        serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.remove(0),
        other => other,
    };
    serde_json::from_value(value).map_err(Error::from)
}

fn parse_inserted(value: &serde_json::Value) -> u32 {
    value
        .get("inserted")
        .and_then(|v| v.as_u64())
        .or_else(|| value.as_u64())
        .unwrap_or(0) as u32
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn base_params(req: &QueueBuildRequest) -> serde_json::Value {
    let mut params = json!({
        "target_date": req.target_date.format("%Y-%m-%d").to_string(),
        "targeting_id": req.targeting_id,
        "sql": req.targeting_sql,
        "ng_companies": req.ng_companies,
        "max_daily": QUEUE_CAP,
        "shards": req.shards,
    });
    if req.use_extra && !req.test_mode {
        params["use_extra"] = json!(true);
        params["client_name"] = json!(req.client_name);
    }
    params
}

/// (Re)build the day's queue for one targeting.
pub async fn build_for_targeting(
    rpc: &dyn RpcCaller,
    cfg: &SupabaseConfig,
    req: &QueueBuildRequest,
) -> Result<QueueBuildOutcome> {
    let variant = TableVariant::resolve(req.test_mode, req.use_extra);
    if req.use_extra && req.client_name.trim().is_empty() {
        return Err(Error::ClientData {
            targeting_id: req.targeting_id,
            message: "extra-table build requires client company_name".into(),
        });
    }

    let full_timeout = Duration::from_millis(cfg.full_statement_timeout_ms);

    rpc.call(
        &format!("clear_send_queue_for_targeting{}", variant.suffix()),
        json!({ "targeting_id": req.targeting_id }),
        full_timeout,
    )
    .await?;

    let create = rpc
        .call(
            &format!("create_queue_for_targeting{}", variant.suffix()),
            base_params(req),
            full_timeout,
        )
        .await;

    match create {
        Ok(value) => Ok(QueueBuildOutcome {
            success: true,
            inserted_total: parse_inserted(&value),
            fallback_used: false,
            time_budget_exceeded: false,
            steps: 0,
        }),
        Err(Error::StatementTimeout { .. }) => {
            tracing::warn!(
                targeting_id = req.targeting_id,
                "full queue build timed out, switching to chunked inserts"
            );
            chunked_fallback(rpc, cfg, req, variant).await
        }
        Err(e) => Err(e),
    }
}

async fn chunked_fallback(
    rpc: &dyn RpcCaller,
    cfg: &SupabaseConfig,
    req: &QueueBuildRequest,
    variant: TableVariant,
) -> Result<QueueBuildOutcome> {
    let step_timeout = Duration::from_millis(cfg.step_statement_timeout_ms);
    let procedure = format!("create_queue_for_targeting_step{}", variant.suffix());
    let started = tokio::time::Instant::now();

    let mut ctl = ChunkController::new();
    let mut time_budget_exceeded = false;
    let mut steps = 0u32;

    'stages: for stage in 1..=2u8 {
        ctl.begin_stage(stage);
        loop {
            if ctl.row_cap_reached() {
                break 'stages;
            }
            if started.elapsed().as_millis() as u64 >= CHUNK_TIME_BUDGET_MS {
                time_budget_exceeded = true;
                break 'stages;
            }
            if ctl.stage_guard_tripped() {
                tracing::warn!(
                    targeting_id = req.targeting_id,
                    stage,
                    "stage iteration guard tripped"
                );
                break;
            }

            let mut params = base_params(req);
            params["limit"] = json!(ctl.limit);
            params["after_id"] = json!(ctl.after_id);
            params["stage"] = json!(stage);
            params["id_window"] = json!(ctl.id_window);

            let step_started = tokio::time::Instant::now();
            match rpc.call(&procedure, params, step_timeout).await {
                Ok(value) => {
                    steps += 1;
                    let step = parse_step_result(value)?;
                    let elapsed_ms = step_started.elapsed().as_millis() as u64;
                    tracing::debug!(
                        targeting_id = req.targeting_id,
                        stage,
                        inserted = step.inserted,
                        last_id = step.last_id,
                        has_more = step.has_more,
                        elapsed_ms,
                        limit = ctl.limit,
                        "queue step completed"
                    );
                    if ctl.record_success(step.inserted, step.last_id, step.has_more, elapsed_ms)
                        == StepAdvance::StageDone
                    {
                        break;
                    }
                }
                Err(Error::StatementTimeout { .. }) => {
                    steps += 1;
                    ctl.record_timeout().map_err(|_| Error::Rpc {
                        procedure: procedure.clone(),
                        message: "statement timeout at minimum chunk size".into(),
                    })?;
                    tokio::time::sleep(Duration::from_millis(TIMEOUT_RETRY_SLEEP_MS)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(QueueBuildOutcome {
        success: true,
        inserted_total: ctl.total.min(QUEUE_CAP),
        fallback_used: true,
        time_budget_exceeded,
        steps,
    })
}

/// Build queues for a prepared batch of targetings; one failure never
/// aborts the rest.
pub async fn build_for_all(
    rpc: &dyn RpcCaller,
    cfg: &SupabaseConfig,
    requests: &[QueueBuildRequest],
) -> BulkOutcome {
    let mut details = Vec::with_capacity(requests.len());
    let mut inserted_total = 0u32;
    let mut failed = 0u32;

    for req in requests {
        match build_for_targeting(rpc, cfg, req).await {
            Ok(outcome) => {
                inserted_total += outcome.inserted_total;
                details.push(BulkDetail {
                    targeting_id: req.targeting_id,
                    success: true,
                    inserted: outcome.inserted_total,
                    error: None,
                    error_type: None,
                });
            }
            Err(e) => {
                failed += 1;
                tracing::error!(
                    targeting_id = req.targeting_id,
                    error = %e,
                    "queue build failed"
                );
                details.push(BulkDetail {
                    targeting_id: req.targeting_id,
                    success: false,
                    inserted: 0,
                    error: Some(e.to_string()),
                    error_type: Some(e.kind()),
                });
            }
        }
    }

    BulkOutcome {
        success: failed == 0,
        processed: requests.len() as u32,
        failed,
        inserted_total,
        details,
    }
}

/// Reset the whole daily queue for a table variant.
pub async fn reset_all(
    rpc: &dyn RpcCaller,
    cfg: &SupabaseConfig,
    variant: TableVariant,
) -> Result<()> {
    rpc.call(
        &format!("reset_send_queue_all{}", variant.suffix()),
        json!({}),
        Duration::from_millis(cfg.full_statement_timeout_ms),
    )
    .await?;
    Ok(())
}
