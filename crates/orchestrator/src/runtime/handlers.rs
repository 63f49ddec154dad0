//! Entry handlers.
//!
//! A time-based trigger fires one of these by name: the handler clears its
//! own pending triggers, gates on the business-day calendar, walks the
//! active targetings dispatching each one, and schedules the next-day
//! trigger at its own hour. Per-targeting failures never abort the loop.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;

use fso_domain::error::{Error, ErrorKind, Result};
use fso_domain::targeting::TargetingRow;
use fso_properties::keys;

use super::autostop::AUTO_STOP_HANDLER;
use super::dispatch::{self, DispatchOptions};
use crate::schedule::{jst_now, next_execution_time, next_weekday_time_at};
use crate::state::AppState;

pub const HANDLER_AT_7: &str = "form_sender_at_7";
pub const HANDLER_AT_13: &str = "form_sender_at_13";
pub const HANDLER_GENERIC: &str = "form_sender";

/// Run a named handler; the trigger runner and the CLI both enter here.
pub async fn run_handler(
    state: &AppState,
    name: &str,
    now: DateTime<Utc>,
) -> Result<serde_json::Value> {
    match name {
        HANDLER_AT_7 => {
            let summary = start_from_trigger(state, Some(7), HANDLER_AT_7, now).await?;
            Ok(serde_json::to_value(summary)?)
        }
        HANDLER_AT_13 => {
            let summary = start_from_trigger(state, Some(13), HANDLER_AT_13, now).await?;
            Ok(serde_json::to_value(summary)?)
        }
        HANDLER_GENERIC => {
            let summary = start_from_trigger(state, None, HANDLER_GENERIC, now).await?;
            Ok(serde_json::to_value(summary)?)
        }
        AUTO_STOP_HANDLER => {
            let outcome = state.autostop.fire(state.control.as_ref(), now).await?;
            Ok(serde_json::to_value(outcome)?)
        }
        other => Err(Error::Config(format!("unknown handler '{other}'"))),
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StartSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    pub processed: u32,
    pub failed: u32,
    pub window_skipped: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_trigger_at: Option<String>,
    pub details: Vec<serde_json::Value>,
}

impl StartSummary {
    fn skipped(reason: impl Into<String>, next: Option<String>) -> Self {
        Self {
            success: true,
            skipped: Some(reason.into()),
            processed: 0,
            failed: 0,
            window_skipped: 0,
            next_trigger_at: next,
            details: vec![],
        }
    }
}

/// Trigger-driven session start.
pub async fn start_from_trigger(
    state: &AppState,
    hour: Option<u32>,
    handler_name: &str,
    now: DateTime<Utc>,
) -> Result<StartSummary> {
    // Clear any duplicate or stale triggers for this handler first.
    let removed = state.triggers.delete_by_handler(handler_name).await?;
    if removed > 0 {
        tracing::debug!(handler = handler_name, removed, "cleared pending triggers");
    }

    let now_jst = jst_now(now);
    let today = now_jst.date_naive();

    // ── Business-day gate ────────────────────────────────────────────
    if !state.calendar.is_business_day_jst(today).await {
        let next = next_launch_time(state, hour, now_jst).await;
        state
            .triggers
            .create_one_shot(handler_name, next.with_timezone(&Utc), now)
            .await?;
        tracing::info!(%today, next = %next, "not a business day, rescheduled");
        return Ok(StartSummary::skipped(
            format!("{today} is not a business day"),
            Some(next.to_rfc3339()),
        ));
    }

    // ── Session start ────────────────────────────────────────────────
    let session_hours = state
        .props
        .get_f64(keys::DEFAULT_SESSION_HOURS)
        .await
        .filter(|&h| h > 0.0)
        .unwrap_or(state.config.scheduling.default_session_hours);
    state
        .autostop
        .register_session_start(handler_name, true, session_hours, now)
        .await?;
    state
        .props
        .set_json(
            keys::ACTIVE_SESSION_INFO,
            &json!({
                "started_at": now.to_rfc3339(),
                "trigger": handler_name,
                "targeting_ids": [],
            }),
        )
        .await?;

    // ── Targeting loop ───────────────────────────────────────────────
    let active = state.config_source.list_active_targetings().await?;
    let options = DispatchOptions {
        test_mode: false,
        use_extra: false,
        trigger: handler_name.to_owned(),
        workflow_trigger: "automated".into(),
        branch: None,
    };
    let mut summary = StartSummary {
        success: true,
        skipped: None,
        processed: 0,
        failed: 0,
        window_skipped: 0,
        next_trigger_at: None,
        details: vec![],
    };
    let mut launched: Vec<i64> = Vec::new();

    for targeting in &active {
        summary.processed += 1;
        let id = targeting.targeting_id;
        let report = process_targeting(state, id, &options, now_jst, now).await;
        match report {
            TargetingOutcome::Dispatched(report) => {
                if report.success {
                    launched.push(id);
                } else {
                    summary.failed += 1;
                }
                summary.details.push(json!({
                    "targeting_id": id,
                    "report": report,
                }));
            }
            TargetingOutcome::WindowSkipped(reason) => {
                summary.window_skipped += 1;
                summary.details.push(json!({
                    "targeting_id": id,
                    "success": false,
                    "error_type": ErrorKind::BusinessHours,
                    "message": reason,
                }));
            }
            TargetingOutcome::Failed(e) => {
                summary.failed += 1;
                tracing::error!(targeting_id = id, error = %e, "targeting failed");
                summary.details.push(json!({
                    "targeting_id": id,
                    "success": false,
                    "error": e.to_string(),
                    "error_type": e.kind(),
                }));
            }
        }
    }

    state
        .props
        .set_json(
            keys::ACTIVE_SESSION_INFO,
            &json!({
                "started_at": now.to_rfc3339(),
                "trigger": handler_name,
                "targeting_ids": launched,
            }),
        )
        .await?;

    // ── Next-day trigger ─────────────────────────────────────────────
    let next = next_launch_time(state, hour, now_jst).await;
    state
        .triggers
        .create_one_shot(handler_name, next.with_timezone(&Utc), now)
        .await?;
    summary.next_trigger_at = Some(next.to_rfc3339());
    summary.success = summary.failed == 0;
    Ok(summary)
}

/// Per-hour handlers pin their hour; the generic one preserves its own.
async fn next_launch_time(
    state: &AppState,
    hour: Option<u32>,
    now_jst: DateTime<Tz>,
) -> DateTime<Tz> {
    match hour {
        Some(h) => next_weekday_time_at(&state.calendar, h, now_jst).await,
        None => next_execution_time(&state.calendar, now_jst).await,
    }
}

enum TargetingOutcome {
    Dispatched(dispatch::DispatchReport),
    WindowSkipped(String),
    Failed(Error),
}

async fn process_targeting(
    state: &AppState,
    targeting_id: i64,
    options: &DispatchOptions,
    now_jst: DateTime<Tz>,
    now: DateTime<Utc>,
) -> TargetingOutcome {
    let config = match state.config_source.get_targeting_config(targeting_id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            return TargetingOutcome::Failed(Error::Targeting {
                targeting_id,
                message: "targeting not found".into(),
            })
        }
        Err(e) => return TargetingOutcome::Failed(e),
    };

    if let Err(reason) = launch_window_check(&config.targeting, now_jst) {
        tracing::info!(targeting_id, %reason, "skipping launch");
        return TargetingOutcome::WindowSkipped(reason);
    }

    TargetingOutcome::Dispatched(dispatch::dispatch(state, &config, options, now).await)
}

/// A launch is allowed only on the targeting's send days (0 = Monday) and
/// before its send window ends; workers enforce the fine-grained window.
fn launch_window_check(row: &TargetingRow, now_jst: DateTime<Tz>) -> std::result::Result<(), String> {
    let day = now_jst.weekday().num_days_from_monday() as u8;
    if !row.send_days_of_week.contains(&day) {
        return Err(format!("day {day} is not in send_days_of_week"));
    }
    let minutes = (now_jst.hour() * 60 + now_jst.minute()) as u16;
    if minutes >= row.send_end_time {
        return Err(format!(
            "send window ended at {}",
            fso_domain::targeting::format_hhmm(row.send_end_time)
        ));
    }
    Ok(())
}

/// Manual start of one targeting.
pub async fn start_one(
    state: &AppState,
    targeting_id: i64,
    options: &DispatchOptions,
    now: DateTime<Utc>,
) -> dispatch::DispatchReport {
    match state.config_source.get_targeting_config(targeting_id).await {
        Ok(Some(config)) => dispatch::dispatch(state, &config, options, now).await,
        Ok(None) => dispatch::DispatchReport {
            success: false,
            execution_id: None,
            run_total: None,
            task_name: None,
            payload: None,
            dispatcher_response: None,
            message: Some(format!("targeting {targeting_id} not found")),
            error_type: Some(ErrorKind::TargetingConfig),
        },
        Err(e) => dispatch::DispatchReport {
            success: false,
            execution_id: None,
            run_total: None,
            task_name: None,
            payload: None,
            dispatcher_response: None,
            message: Some(e.to_string()),
            error_type: Some(e.kind()),
        },
    }
}

/// Manual start of every active targeting. No business-day gate, no
/// rescheduling — the operator asked for it now.
pub async fn start_all(
    state: &AppState,
    options: &DispatchOptions,
    now: DateTime<Utc>,
) -> Result<StartSummary> {
    let active = state.config_source.list_active_targetings().await?;
    let mut summary = StartSummary {
        success: true,
        skipped: None,
        processed: 0,
        failed: 0,
        window_skipped: 0,
        next_trigger_at: None,
        details: vec![],
    };
    for targeting in &active {
        summary.processed += 1;
        let report = start_one(state, targeting.targeting_id, options, now).await;
        if !report.success {
            summary.failed += 1;
        }
        summary.details.push(json!({
            "targeting_id": targeting.targeting_id,
            "report": report,
        }));
    }
    summary.success = summary.failed == 0;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testutil::{sample_config, Harness};
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Asia::Tokyo;

    fn jst(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Tokyo
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn holiday_skips_work_and_reschedules_to_monday() {
        // Friday 2024-05-03 is a national holiday.
        let holiday = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let h = Harness::new(vec![holiday]).with_config(sample_config(1));
        let now = jst(2024, 5, 3, 7);

        let summary = start_from_trigger(&h.state, Some(7), HANDLER_AT_7, now)
            .await
            .unwrap();
        assert!(summary.success);
        assert!(summary.skipped.is_some());
        assert_eq!(summary.processed, 0);
        assert!(h.tasks.enqueued.lock().is_empty());

        let triggers = h.state.triggers.list().await;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].handler, HANDLER_AT_7);
        assert_eq!(triggers[0].fire_at, jst(2024, 5, 6, 7));
    }

    #[tokio::test]
    async fn business_day_dispatches_and_schedules_next_day() {
        let h = Harness::new(vec![]).with_config(sample_config(1));
        // Monday 2024-06-10 07:00 JST.
        let now = jst(2024, 6, 10, 7);

        let summary = start_from_trigger(&h.state, Some(7), HANDLER_AT_7, now)
            .await
            .unwrap();
        assert!(summary.success, "details: {:?}", summary.details);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);

        // One task launched with the deterministic id.
        assert_eq!(*h.tasks.enqueued.lock(), vec!["fs-20240610-1-0".to_string()]);

        // Next-day trigger at the same hour, plus the single auto-stop trigger.
        let triggers = h.state.triggers.list().await;
        let at7: Vec<_> = triggers.iter().filter(|t| t.handler == HANDLER_AT_7).collect();
        assert_eq!(at7.len(), 1);
        assert_eq!(at7[0].fire_at, jst(2024, 6, 11, 7));
        let stops: Vec<_> = triggers
            .iter()
            .filter(|t| t.handler == AUTO_STOP_HANDLER)
            .collect();
        assert_eq!(stops.len(), 1);

        // Auto-stop schedule: global max-runtime + two targeting entries.
        assert_eq!(h.state.autostop.entries().await.len(), 3);

        // Session info records the launched targeting.
        let info: serde_json::Value = h
            .state
            .props
            .get_json(keys::ACTIVE_SESSION_INFO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info["targeting_ids"], serde_json::json!([1]));
    }

    #[tokio::test]
    async fn excluded_day_is_window_skipped_not_failed() {
        let mut config = sample_config(1);
        // Saturday-only campaign, launched on a Monday.
        config.targeting.send_days_of_week = [5u8].into_iter().collect();
        let h = Harness::new(vec![]).with_config(config);

        let summary = start_from_trigger(&h.state, Some(7), HANDLER_AT_7, jst(2024, 6, 10, 7))
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.window_skipped, 1);
        assert_eq!(summary.failed, 0);
        assert!(h.tasks.enqueued.lock().is_empty());
        assert_eq!(
            summary.details[0]["error_type"],
            serde_json::json!("BUSINESS_HOURS_ERROR")
        );
    }

    #[tokio::test]
    async fn ended_window_is_skipped() {
        let mut config = sample_config(1);
        config.targeting.send_end_time = 12 * 60;
        let h = Harness::new(vec![]).with_config(config);

        let summary = start_from_trigger(&h.state, Some(13), HANDLER_AT_13, jst(2024, 6, 10, 13))
            .await
            .unwrap();
        assert_eq!(summary.window_skipped, 1);
        assert!(h.tasks.enqueued.lock().is_empty());
    }

    #[tokio::test]
    async fn per_targeting_failure_does_not_abort_the_loop() {
        let good = sample_config(1);
        let mut bad = sample_config(2);
        bad.client.phone_1 = String::new();
        // The fake provider serves the row as-is; dispatch fails when the
        // queue-extra guard hits the blank company name.
        bad.targeting.use_extra_table = fso_domain::targeting::Flag::Explicit(true);
        bad.client.company_name = String::new();
        let h = Harness::new(vec![]).with_config(good).with_config(bad);

        let summary = start_from_trigger(&h.state, Some(7), HANDLER_AT_7, jst(2024, 6, 10, 7))
            .await
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.success);
        // The healthy targeting still launched.
        assert_eq!(h.tasks.enqueued.lock().len(), 1);
    }

    #[tokio::test]
    async fn generic_handler_preserves_current_hour() {
        let h = Harness::new(vec![]).with_config(sample_config(1));
        let summary = start_from_trigger(&h.state, None, HANDLER_GENERIC, jst(2024, 6, 10, 13))
            .await
            .unwrap();
        let next = summary.next_trigger_at.unwrap();
        assert!(next.contains("T13:00:00"), "next: {next}");
    }

    #[tokio::test]
    async fn unknown_handler_is_an_error() {
        let h = Harness::new(vec![]);
        let err = run_handler(&h.state, "nope", jst(2024, 6, 10, 7))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown handler"));
    }

    #[tokio::test]
    async fn start_one_reports_missing_targeting() {
        let h = Harness::new(vec![]);
        let report = start_one(
            &h.state,
            42,
            &DispatchOptions::default(),
            jst(2024, 6, 10, 9),
        )
        .await;
        assert!(!report.success);
        assert_eq!(report.error_type, Some(ErrorKind::TargetingConfig));
    }

    #[tokio::test]
    async fn start_all_aggregates_manual_runs() {
        let h = Harness::new(vec![])
            .with_config(sample_config(1))
            .with_config(sample_config(2));
        let summary = start_all(
            &h.state,
            &DispatchOptions::default(),
            jst(2024, 6, 10, 9),
        )
        .await
        .unwrap();
        assert!(summary.success);
        assert_eq!(summary.processed, 2);
        assert_eq!(h.tasks.enqueued.lock().len(), 2);
    }
}
