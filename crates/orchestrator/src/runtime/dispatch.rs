//! Dispatch router.
//!
//! Takes one validated targeting, materializes the day's queue, uploads the
//! client config, mints its signed URL, and launches the workload on the
//! resolved backend — idempotently, with artifact rollback when anything
//! after the upload fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use fso_domain::error::{Error, ErrorKind};
use fso_domain::targeting::TargetingConfig;
use fso_google::tasks::{retry_window, sanitize_task_id, TaskRequest};
use fso_properties::keys;

use super::batch::{self, BatchInputs, BatchPlan};
use super::mode::{self, ExecutionMode, ModeInputs};
use super::payload::{DispatchPayload, ExecutionBlock, TablesBlock};
use super::queue::{self, QueueBuildRequest, TableVariant};
use super::run_index;
use crate::schedule::{jst_date, jst_now};
use crate::state::AppState;

#[derive(Clone, Debug)]
pub struct DispatchOptions {
    pub test_mode: bool,
    pub use_extra: bool,
    /// Handler (or "manual") that initiated this dispatch; recorded in
    /// payload metadata.
    pub trigger: String,
    /// `automated` for trigger-driven runs, `manual` otherwise.
    pub workflow_trigger: String,
    pub branch: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            test_mode: false,
            use_extra: false,
            trigger: "manual".into(),
            workflow_trigger: "manual".into(),
            branch: None,
        }
    }
}

/// Uniform dispatch result. `success == false` carries `message` and
/// usually an `error_type` from the taxonomy.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatcher_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

impl DispatchReport {
    fn failure(message: impl Into<String>, error_type: ErrorKind) -> Self {
        Self {
            success: false,
            execution_id: None,
            run_total: None,
            task_name: None,
            payload: None,
            dispatcher_response: None,
            message: Some(message.into()),
            error_type: Some(error_type),
        }
    }

    fn from_error(e: &Error) -> Self {
        Self::failure(e.to_string(), e.kind())
    }
}

/// Dispatch one targeting. Never panics or errors — every failure comes
/// back as a report.
pub async fn dispatch(
    state: &AppState,
    config: &TargetingConfig,
    options: &DispatchOptions,
    now: DateTime<Utc>,
) -> DispatchReport {
    let targeting_id = config.targeting.targeting_id;

    // ── 1. Execution mode ────────────────────────────────────────────
    let global_batch = state
        .props
        .get_bool(keys::USE_GCP_BATCH)
        .await
        .unwrap_or(state.config.sender.use_gcp_batch);
    let global_serverless = state
        .props
        .get_bool(keys::USE_SERVERLESS)
        .await
        .unwrap_or(state.config.sender.use_serverless);
    let (exec_mode, _demoted) = mode::resolve(ModeInputs {
        explicit_batch: config.targeting.use_gcp_batch,
        explicit_serverless: config.targeting.use_serverless,
        global_batch,
        global_serverless,
        queue_wired: state.queue_wired(),
    });
    let dispatcher_mode = exec_mode.dispatcher_mode().unwrap_or("cloud_run");

    let test_mode = options.test_mode;
    let use_extra = !test_mode
        && (options.use_extra || config.targeting.use_extra_table.is_explicit_true());
    let variant = TableVariant::resolve(test_mode, use_extra);

    // ── 2. Run total ─────────────────────────────────────────────────
    let mut run_total = config.targeting.concurrent_workflow.max(1);
    let batch_instance_count = if exec_mode == ExecutionMode::Batch {
        let count = state
            .props
            .get_u32(keys::BATCH_INSTANCE_COUNT)
            .await
            .or(config.targeting.batch.instance_count)
            .or(state.config.sender.batch.instance_count)
            .map(|n| n.clamp(1, 16));
        if let Some(count) = count {
            run_total = run_total.max(count);
        }
        count
    } else {
        None
    };

    // ── 3..5. Parallelism, workers, shards ───────────────────────────
    let parallelism_override = state.props.get_u32(keys::PARALLELISM_OVERRIDE).await;
    let mut parallelism = match parallelism_override {
        Some(cap) if cap >= 1 => run_total.min(cap),
        _ => run_total,
    };

    let mut workers = state
        .props
        .get_u32(keys::WORKERS_OVERRIDE)
        .await
        .unwrap_or(state.config.sender.workers_per_workflow)
        .clamp(1, 4);
    if exec_mode == ExecutionMode::Batch {
        let batch_workers = config
            .targeting
            .batch
            .workers_per_workflow
            .or(state.props.get_u32(keys::BATCH_WORKERS_PER_WORKFLOW).await)
            .or(state.config.sender.batch.workers_per_workflow);
        if let Some(batch_workers) = batch_workers {
            workers = batch_workers.clamp(1, 16);
        }
    }

    let shards = state
        .props
        .get_u32(keys::SHARD_COUNT)
        .await
        .filter(|&n| n > 0)
        .unwrap_or(state.config.sender.shard_count);

    // ── 6. Run-index base ────────────────────────────────────────────
    let run_index_base = match run_index::allocate(&state.props, targeting_id, run_total, now).await
    {
        Ok(base) => base,
        Err(e) => return DispatchReport::from_error(&e),
    };

    // ── 7. Dispatcher-side config validation ─────────────────────────
    let client_config = match serde_json::to_value(config) {
        Ok(v) => v,
        Err(e) => return DispatchReport::from_error(&Error::from(e)),
    };
    if exec_mode != ExecutionMode::Github {
        if let Some(dispatcher) = &state.dispatcher {
            match dispatcher.validate_config(&client_config).await {
                Ok(result) if !result.valid => {
                    return DispatchReport::failure(
                        result
                            .message
                            .unwrap_or_else(|| "dispatcher rejected the client config".into()),
                        ErrorKind::ValidationFailed,
                    );
                }
                Ok(_) => {}
                Err(e) => return DispatchReport::from_error(&e),
            }
        }
    }

    // ── 8. Queue build ───────────────────────────────────────────────
    let queue_request = QueueBuildRequest {
        targeting_id,
        target_date: jst_date(now),
        targeting_sql: config.targeting.targeting_sql.clone(),
        ng_companies: config.targeting.ng_companies.clone(),
        client_name: config.client.company_name.clone(),
        use_extra,
        test_mode,
        shards,
    };
    let queue_outcome =
        match queue::build_for_targeting(state.rpc.as_ref(), &state.config.supabase, &queue_request)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return DispatchReport::from_error(&e),
        };
    tracing::info!(
        targeting_id,
        inserted = queue_outcome.inserted_total,
        fallback = queue_outcome.fallback_used,
        "queue ready"
    );

    // ── 9. Artifact upload ───────────────────────────────────────────
    let date_compact = jst_date(now).format("%Y%m%d").to_string();
    let bucket = state.config.google.bucket.clone();
    let object = format!(
        "{date_compact}/targeting-{targeting_id}-{}.json",
        Uuid::new_v4()
    );
    let object_uri = match state.storage.upload_json(&bucket, &object, &client_config).await {
        Ok(uri) => uri,
        Err(e) => return DispatchReport::from_error(&e),
    };

    // Everything past this point rolls the artifact back on failure.
    match assemble_and_launch(
        state,
        config,
        options,
        now,
        LaunchInputs {
            exec_mode,
            dispatcher_mode,
            variant,
            run_total,
            parallelism: &mut parallelism,
            workers,
            shards,
            run_index_base,
            batch_instance_count,
            bucket: &bucket,
            object: &object,
            object_uri: &object_uri,
            date_compact: &date_compact,
        },
    )
    .await
    {
        Ok(report) => {
            // ── Auto-stop registration (non-fatal) ───────────────────
            if let Err(e) = state.autostop.register_for_targeting(config, now).await {
                tracing::error!(targeting_id, error = %e, "auto-stop registration failed");
            }
            report
        }
        Err(e) => {
            if let Err(del) = state.storage.delete_object(&bucket, &object).await {
                tracing::warn!(%object, error = %del, "artifact rollback failed");
            }
            DispatchReport::from_error(&e)
        }
    }
}

struct LaunchInputs<'a> {
    exec_mode: ExecutionMode,
    dispatcher_mode: &'a str,
    variant: TableVariant,
    run_total: u32,
    parallelism: &'a mut u32,
    workers: u32,
    shards: u32,
    run_index_base: u32,
    batch_instance_count: Option<u32>,
    bucket: &'a str,
    object: &'a str,
    object_uri: &'a str,
    date_compact: &'a str,
}

async fn assemble_and_launch(
    state: &AppState,
    config: &TargetingConfig,
    options: &DispatchOptions,
    now: DateTime<Utc>,
    inputs: LaunchInputs<'_>,
) -> fso_domain::Result<DispatchReport> {
    let targeting_id = config.targeting.targeting_id;

    // ── 10. Signed URL ───────────────────────────────────────────────
    let ttl_hours = resolve_ttl_hours(state, inputs.exec_mode).await;
    let signed_url = state.storage.signed_get_url(
        inputs.bucket,
        inputs.object,
        Duration::from_secs(u64::from(ttl_hours) * 3600),
        now,
    )?;

    // ── 11. Batch plan + payload ─────────────────────────────────────
    let batch_plan = if inputs.exec_mode == ExecutionMode::Batch {
        let plan = build_batch_plan(state, config, &inputs, ttl_hours).await;
        *inputs.parallelism = (*inputs.parallelism).min(plan.max_parallelism);
        Some(plan)
    } else {
        None
    };

    let execution_id = Uuid::new_v4();
    let payload = DispatchPayload {
        execution_id,
        targeting_id,
        client_config_ref: signed_url,
        client_config_object: inputs.object_uri.to_owned(),
        tables: TablesBlock::for_variant(inputs.variant),
        execution: ExecutionBlock {
            run_total: inputs.run_total,
            parallelism: *inputs.parallelism,
            run_index_base: inputs.run_index_base,
            shards: inputs.shards,
            workers_per_workflow: inputs.workers,
        },
        test_mode: options.test_mode,
        branch: options.branch.clone(),
        workflow_trigger: options.workflow_trigger.clone(),
        metadata: json!({
            "triggered_at_jst": jst_now(now).to_rfc3339(),
            "gas_trigger": options.trigger,
            "batch_instance_count": inputs.batch_instance_count,
        }),
        mode: inputs.dispatcher_mode.to_owned(),
        dispatcher_mode: inputs.dispatcher_mode.to_owned(),
        cpu_class: batch_plan
            .as_ref()
            .filter(|p| p.prefer_spot)
            .map(|_| "gcp_spot"),
        batch: batch_plan,
    };
    let payload_value = serde_json::to_value(&payload)?;

    // ── 12. Launch ───────────────────────────────────────────────────
    let (task_name, dispatcher_response) = match inputs.exec_mode {
        ExecutionMode::Github => {
            let workflow = state.workflow.as_ref().ok_or_else(|| {
                Error::Github("CI-workflow backend is not configured".into())
            })?;
            workflow
                .dispatch(json!({
                    "targeting_id": targeting_id.to_string(),
                    "run_index_base": inputs.run_index_base.to_string(),
                    "run_total": inputs.run_total.to_string(),
                    "client_config_ref": payload.client_config_ref,
                    "test_mode": options.test_mode.to_string(),
                }))
                .await?;
            (None, json!({ "backend": "github_workflow" }))
        }
        ExecutionMode::Batch | ExecutionMode::Serverless => {
            let tasks = state.tasks.as_ref().ok_or_else(|| {
                Error::Config("task queue is not configured".into())
            })?;
            let task_id = sanitize_task_id(&format!(
                "fs-{}-{}-{}",
                inputs.date_compact, targeting_id, inputs.run_index_base
            ));
            let request = TaskRequest {
                task_id: task_id.clone(),
                url: format!(
                    "{}/v1/form-sender/dispatch",
                    state.config.dispatcher.base_url.trim_end_matches('/')
                ),
                oidc_service_account: state.config.dispatcher.audience_service_account.clone(),
                body: serde_json::to_vec(&payload_value)?,
                schedule_delay: Duration::from_secs(1),
                retry: retry_window(now),
            };
            let outcome = tasks.enqueue(&request, now).await?;
            let name = tasks.task_name(&task_id);
            let response = if outcome.is_duplicate() {
                json!({ "duplicate": true, "status": "ALREADY_EXISTS" })
            } else {
                json!({ "task": name })
            };
            (Some(name), response)
        }
    };

    Ok(DispatchReport {
        success: true,
        execution_id: Some(execution_id),
        run_total: Some(inputs.run_total),
        task_name,
        payload: Some(payload_value),
        dispatcher_response: Some(dispatcher_response),
        message: None,
        error_type: None,
    })
}

async fn resolve_ttl_hours(state: &AppState, exec_mode: ExecutionMode) -> u32 {
    let default = match exec_mode {
        ExecutionMode::Batch => state.config.sender.signed_url.batch_ttl_hours,
        _ => state.config.sender.signed_url.cloud_run_ttl_hours,
    };
    match state.props.get_u32(keys::SIGNED_URL_TTL_HOURS).await {
        Some(hours) => batch::clamp_ttl_hours(hours),
        None => default,
    }
}

async fn build_batch_plan(
    state: &AppState,
    config: &TargetingConfig,
    inputs: &LaunchInputs<'_>,
    ttl_hours: u32,
) -> BatchPlan {
    let defaults = &state.config.sender.batch;
    let overrides = &config.targeting.batch;
    let refresh = match state.props.get_u32(keys::SIGNED_URL_REFRESH_THRESHOLD).await {
        Some(seconds) => batch::clamp_refresh_threshold(seconds),
        None => state.config.sender.signed_url.refresh_threshold_seconds,
    };
    batch::build(&BatchInputs {
        workers: inputs.workers,
        parallelism: *inputs.parallelism,
        instance_count: inputs.batch_instance_count,
        vcpu_per_worker: overrides.vcpu_per_worker.or(Some(defaults.vcpu_per_worker)),
        memory_per_worker_mb: overrides
            .memory_per_worker_mb
            .or(Some(defaults.memory_per_worker_mb)),
        memory_buffer_mb: overrides.memory_buffer_mb.or(Some(defaults.memory_buffer_mb)),
        configured_machine: overrides
            .machine_type
            .clone()
            .unwrap_or_else(|| defaults.machine_type.clone()),
        machine_override: state.props.get(keys::MACHINE_TYPE_OVERRIDE).await,
        max_parallelism: state
            .props
            .get_u32(keys::MAX_PARALLELISM)
            .await
            .unwrap_or(defaults.max_parallelism),
        max_attempts: overrides.max_attempts.or(Some(defaults.max_attempts)),
        prefer_spot: overrides.prefer_spot.unwrap_or(defaults.prefer_spot),
        allow_on_demand_fallback: overrides
            .allow_on_demand_fallback
            .unwrap_or(defaults.allow_on_demand_fallback),
        workers_per_workflow: Some(inputs.workers),
        signed_url_ttl_hours: ttl_hours,
        signed_url_refresh_threshold_seconds: refresh,
    })
}
