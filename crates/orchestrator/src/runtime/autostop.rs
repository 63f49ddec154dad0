//! Auto-stop scheduling.
//!
//! A merged, sorted schedule of (targeting, reason, stop-at) entries lives
//! in the property store; exactly one pending one-shot trigger is kept
//! aligned with the earliest entry. Firing executes every entry that is due
//! (or nearly due), and a global stop supersedes all pending targeted stops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Tokyo;
use serde::{Deserialize, Serialize};
use serde_json::json;

use fso_domain::error::Result;
use fso_domain::targeting::TargetingConfig;
use fso_properties::{keys, PropertyStore};

use crate::schedule::TriggerStore;

/// Handler name bound to the auto-stop trigger.
pub const AUTO_STOP_HANDLER: &str = "auto_stop";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxRuntime,
    BusinessEnd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoStopEntry {
    /// `None` stops every running task.
    pub targeting_id: Option<i64>,
    pub reason: StopReason,
    pub stop_at_epoch_ms: i64,
    /// Same instant, human-readable in JST.
    pub stop_at_iso: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AutoStopEntry {
    fn new(
        targeting_id: Option<i64>,
        reason: StopReason,
        stop_at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            targeting_id,
            reason,
            stop_at_epoch_ms: stop_at.timestamp_millis(),
            stop_at_iso: stop_at.with_timezone(&Tokyo).to_rfc3339(),
            metadata,
        }
    }

    fn key(&self) -> (Option<i64>, StopReason) {
        (self.targeting_id, self.reason)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredSchedule {
    version: u8,
    #[serde(default)]
    entries: Vec<AutoStopEntry>,
}

/// Executes the actual stops when entries fire.
#[async_trait]
pub trait StopExecutor: Send + Sync {
    async fn stop_all(&self) -> Result<u32>;
    async fn stop_targeting(&self, targeting_id: i64) -> Result<u32>;
}

/// Summary of one fire-handler invocation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FireOutcome {
    pub executed: u32,
    pub stopped: u32,
    pub global_stop: bool,
    pub remaining: u32,
}

pub struct AutoStopScheduler {
    props: Arc<PropertyStore>,
    triggers: Arc<TriggerStore>,
    min_delay: Duration,
}

impl AutoStopScheduler {
    pub fn new(props: Arc<PropertyStore>, triggers: Arc<TriggerStore>, min_delay: Duration) -> Self {
        Self {
            props,
            triggers,
            min_delay,
        }
    }

    fn min_delay_ms(&self) -> i64 {
        self.min_delay.as_millis() as i64
    }

    async fn load(&self) -> Vec<AutoStopEntry> {
        self.props
            .get_json::<StoredSchedule>(keys::AUTO_STOP_SCHEDULE)
            .await
            .ok()
            .flatten()
            .map(|s| s.entries)
            .unwrap_or_default()
    }

    async fn save(&self, entries: Vec<AutoStopEntry>) -> Result<()> {
        self.props
            .set_json(
                keys::AUTO_STOP_SCHEDULE,
                &StoredSchedule { version: 1, entries },
            )
            .await
    }

    pub async fn entries(&self) -> Vec<AutoStopEntry> {
        self.load().await
    }

    /// Merge `incoming` into the stored schedule: drop stale entries, keep
    /// the newest entry per `(targeting_id, reason)`, sort ascending, and
    /// re-bind the trigger.
    async fn merge_and_bind(
        &self,
        incoming: Vec<AutoStopEntry>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let stale_before = now.timestamp_millis() - self.min_delay_ms();
        let mut entries = self.load().await;
        entries.retain(|e| e.stop_at_epoch_ms >= stale_before);
        for entry in incoming {
            entries.retain(|e| e.key() != entry.key());
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.stop_at_epoch_ms);
        self.save(entries).await?;
        self.refresh_trigger(now).await
    }

    /// Session start: optionally reset everything, then enqueue the global
    /// max-runtime stop.
    pub async fn register_session_start(
        &self,
        trigger_name: &str,
        reset: bool,
        session_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if reset {
            self.save(Vec::new()).await?;
            self.clear_trigger().await?;
        }
        let stop_at = self.apply_min_delay(
            now + chrono::Duration::milliseconds((session_hours * 3_600_000.0) as i64),
            now,
        );
        let entry = AutoStopEntry::new(
            None,
            StopReason::MaxRuntime,
            stop_at,
            json!({ "trigger": trigger_name, "session_hours": session_hours }),
        );
        self.merge_and_bind(vec![entry], now).await
    }

    /// Per-targeting registration: a max-runtime stop and a business-end
    /// stop at today's send window end.
    pub async fn register_for_targeting(
        &self,
        config: &TargetingConfig,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let targeting_id = config.targeting.targeting_id;

        let runtime_stop = self.apply_min_delay(
            now + chrono::Duration::milliseconds(
                (config.targeting.session_max_hours * 3_600_000.0) as i64,
            ),
            now,
        );

        let end_minutes = config.targeting.send_end_time;
        let today = now.with_timezone(&Tokyo).date_naive();
        let business_end = today
            .and_hms_opt(u32::from(end_minutes / 60), u32::from(end_minutes % 60), 0)
            .and_then(|naive| naive.and_local_timezone(Tokyo).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        let business_end = self.apply_min_delay(business_end, now);

        let entries = vec![
            AutoStopEntry::new(
                Some(targeting_id),
                StopReason::MaxRuntime,
                runtime_stop,
                json!({ "session_max_hours": config.targeting.session_max_hours }),
            ),
            AutoStopEntry::new(
                Some(targeting_id),
                StopReason::BusinessEnd,
                business_end,
                json!({ "send_end_time": fso_domain::targeting::format_hhmm(end_minutes) }),
            ),
        ];
        self.merge_and_bind(entries, now).await
    }

    fn apply_min_delay(&self, stop_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = now + chrono::Duration::milliseconds(self.min_delay_ms());
        stop_at.max(floor)
    }

    async fn clear_trigger(&self) -> Result<()> {
        self.triggers.delete_by_handler(AUTO_STOP_HANDLER).await?;
        self.props.delete(keys::AUTO_STOP_TRIGGER_ID).await;
        Ok(())
    }

    /// Keep exactly one pending trigger aligned with the earliest entry.
    pub async fn refresh_trigger(&self, now: DateTime<Utc>) -> Result<()> {
        self.clear_trigger().await?;
        let entries = self.load().await;
        let Some(earliest) = entries.first() else {
            return Ok(());
        };
        let at = DateTime::<Utc>::from_timestamp_millis(earliest.stop_at_epoch_ms)
            .unwrap_or(now);
        let at = self.apply_min_delay(at, now);
        match self.triggers.create_one_shot(AUTO_STOP_HANDLER, at, now).await {
            Ok(trigger) => {
                self.props
                    .set(keys::AUTO_STOP_TRIGGER_ID, trigger.id.to_string())
                    .await;
            }
            Err(e) => {
                // The schedule is already persisted; a later run re-binds.
                tracing::error!(error = %e, "failed to create auto-stop trigger");
            }
        }
        Ok(())
    }

    /// Fire handler: execute every entry due within `now + min_delay/4`.
    /// A global entry clears the whole schedule.
    pub async fn fire(&self, executor: &dyn StopExecutor, now: DateTime<Utc>) -> Result<FireOutcome> {
        let horizon = now.timestamp_millis() + self.min_delay_ms() / 4;
        let entries = self.load().await;
        let (due, mut remaining): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.stop_at_epoch_ms <= horizon);

        let mut outcome = FireOutcome::default();
        for entry in due {
            outcome.executed += 1;
            let stopped = match entry.targeting_id {
                Some(id) => {
                    tracing::info!(targeting_id = id, reason = ?entry.reason, "auto-stop firing");
                    executor.stop_targeting(id).await
                }
                None => {
                    tracing::info!(reason = ?entry.reason, "global auto-stop firing");
                    outcome.global_stop = true;
                    executor.stop_all().await
                }
            };
            match stopped {
                Ok(n) => outcome.stopped += n,
                Err(e) => {
                    tracing::error!(error = %e, "auto-stop execution failed");
                }
            }
        }

        if outcome.global_stop {
            // Global stop supersedes all pending targeted stops.
            remaining.clear();
            self.props.delete(keys::ACTIVE_SESSION_INFO).await;
        }
        outcome.remaining = remaining.len() as u32;
        self.save(remaining).await?;
        self.refresh_trigger(now).await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    struct RecordingExecutor {
        stops: Mutex<Vec<Option<i64>>>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                stops: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StopExecutor for RecordingExecutor {
        async fn stop_all(&self) -> Result<u32> {
            self.stops.lock().push(None);
            Ok(3)
        }

        async fn stop_targeting(&self, targeting_id: i64) -> Result<u32> {
            self.stops.lock().push(Some(targeting_id));
            Ok(1)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 3, 0, 0).unwrap()
    }

    async fn scheduler() -> (tempfile::TempDir, AutoStopScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let props = Arc::new(PropertyStore::open(dir.path()));
        let triggers = Arc::new(TriggerStore::new(props.clone()));
        (
            dir,
            AutoStopScheduler::new(props, triggers, Duration::from_secs(60)),
        )
    }

    fn config_with(session_hours: f64, end_minutes: u16) -> TargetingConfig {
        let raw = serde_json::json!({
            "targeting": {
                "targeting_id": 1, "client_id": 1, "active": true,
                "description": "", "subject": "s", "message": "m",
                "targeting_sql": "", "ng_companies": [],
                "max_daily_sends": 100, "send_start_time": 540,
                "send_end_time": end_minutes,
                "send_days_of_week": [0, 1, 2, 3, 4],
                "concurrent_workflow": 1,
                "use_extra_table": "unset", "use_serverless": "unset",
                "use_gcp_batch": "unset",
                "session_max_hours": session_hours,
            },
            "client": {
                "company_name": "c", "name": "n", "last_name": "l",
                "first_name": "f", "last_name_kana": "lk", "first_name_kana": "fk",
                "last_name_hiragana": "lh", "first_name_hiragana": "fh",
                "position": "p", "gender": "g", "email_local": "e",
                "email_domain": "d", "phone_1": "1", "phone_2": "2",
                "phone_3": "3", "postal_1": "4", "postal_2": "5",
                "address_1": "a", "address_2": "b", "address_3": "c",
                "address_4": "d",
            }
        });
        serde_json::from_value(raw).unwrap()
    }

    #[tokio::test]
    async fn entries_stay_sorted_and_deduped_per_key() {
        let (_dir, sched) = scheduler().await;
        let cfg = config_with(8.0, 18 * 60);
        sched.register_for_targeting(&cfg, now()).await.unwrap();
        sched.register_session_start("t", false, 4.0, now()).await.unwrap();
        // Re-register the same targeting: its two entries are replaced,
        // not duplicated.
        sched.register_for_targeting(&cfg, now()).await.unwrap();

        let entries = sched.entries().await;
        assert_eq!(entries.len(), 3);
        let mut sorted = entries.clone();
        sorted.sort_by_key(|e| e.stop_at_epoch_ms);
        assert_eq!(entries, sorted);
        let keys: Vec<_> = entries.iter().map(|e| e.key()).collect();
        let mut unique = keys.clone();
        unique.dedup();
        assert_eq!(keys.len(), unique.len());
    }

    #[tokio::test]
    async fn exactly_one_trigger_iff_entries_exist() {
        let (_dir, sched) = scheduler().await;
        assert!(sched.triggers.list().await.is_empty());

        sched
            .register_session_start("t", false, 8.0, now())
            .await
            .unwrap();
        let triggers = sched.triggers.list().await;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].handler, AUTO_STOP_HANDLER);

        // Registering more entries still leaves exactly one trigger,
        // bound to the earliest stop.
        let cfg = config_with(2.0, 18 * 60);
        sched.register_for_targeting(&cfg, now()).await.unwrap();
        let triggers = sched.triggers.list().await;
        assert_eq!(triggers.len(), 1);
        let earliest = sched.entries().await[0].stop_at_epoch_ms;
        assert_eq!(triggers[0].fire_at.timestamp_millis(), earliest);
    }

    #[tokio::test]
    async fn reset_clears_schedule_and_trigger() {
        let (_dir, sched) = scheduler().await;
        sched
            .register_session_start("a", false, 8.0, now())
            .await
            .unwrap();
        sched
            .register_session_start("b", true, 6.0, now())
            .await
            .unwrap();
        // Only the fresh global entry remains.
        let entries = sched.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(sched.triggers.list().await.len(), 1);
    }

    #[tokio::test]
    async fn business_end_respects_min_delay_floor() {
        let (_dir, sched) = scheduler().await;
        // Send window ended at 09:00 JST; now is 12:00 JST.
        let cfg = config_with(8.0, 9 * 60);
        sched.register_for_targeting(&cfg, now()).await.unwrap();
        let entries = sched.entries().await;
        let business_end = entries
            .iter()
            .find(|e| e.reason == StopReason::BusinessEnd)
            .unwrap();
        let floor = now().timestamp_millis() + 60_000;
        assert!(business_end.stop_at_epoch_ms >= floor);
    }

    #[tokio::test]
    async fn targeted_fire_leaves_global_entry_and_rebinds() {
        let (_dir, sched) = scheduler().await;
        // Targeted stop 5 s out, global stop 30 min out.
        sched
            .merge_and_bind(
                vec![
                    AutoStopEntry::new(
                        Some(1),
                        StopReason::BusinessEnd,
                        now() + chrono::Duration::seconds(5),
                        serde_json::Value::Null,
                    ),
                    AutoStopEntry::new(
                        None,
                        StopReason::MaxRuntime,
                        now() + chrono::Duration::minutes(30),
                        serde_json::Value::Null,
                    ),
                ],
                now(),
            )
            .await
            .unwrap();

        let executor = RecordingExecutor::new();
        let fire_at = now() + chrono::Duration::seconds(6);
        let outcome = sched.fire(&executor, fire_at).await.unwrap();

        assert_eq!(outcome.executed, 1);
        assert!(!outcome.global_stop);
        assert_eq!(outcome.remaining, 1);
        assert_eq!(*executor.stops.lock(), vec![Some(1)]);

        // Remaining global entry keeps its single trigger.
        let entries = sched.entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].targeting_id.is_none());
        assert_eq!(sched.triggers.list().await.len(), 1);
    }

    #[tokio::test]
    async fn global_fire_clears_everything() {
        let (_dir, sched) = scheduler().await;
        sched
            .merge_and_bind(
                vec![
                    AutoStopEntry::new(
                        None,
                        StopReason::MaxRuntime,
                        now() + chrono::Duration::seconds(2),
                        serde_json::Value::Null,
                    ),
                    AutoStopEntry::new(
                        Some(7),
                        StopReason::BusinessEnd,
                        now() + chrono::Duration::hours(2),
                        serde_json::Value::Null,
                    ),
                ],
                now(),
            )
            .await
            .unwrap();

        let executor = RecordingExecutor::new();
        let outcome = sched
            .fire(&executor, now() + chrono::Duration::seconds(3))
            .await
            .unwrap();

        assert!(outcome.global_stop);
        assert_eq!(outcome.remaining, 0);
        assert!(sched.entries().await.is_empty());
        assert!(sched.triggers.list().await.is_empty());
    }

    #[tokio::test]
    async fn near_due_entries_fire_within_quarter_min_delay() {
        let (_dir, sched) = scheduler().await;
        // Due 10 s out; horizon is min_delay/4 = 15 s.
        sched
            .merge_and_bind(
                vec![AutoStopEntry::new(
                    Some(3),
                    StopReason::BusinessEnd,
                    now() + chrono::Duration::seconds(10),
                    serde_json::Value::Null,
                )],
                now(),
            )
            .await
            .unwrap();

        let executor = RecordingExecutor::new();
        let outcome = sched.fire(&executor, now()).await.unwrap();
        assert_eq!(outcome.executed, 1);
    }
}
