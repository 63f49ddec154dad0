//! Per-targeting daily run-index allocation.
//!
//! Each dispatched run receives a zero-based offset so worker fleets can
//! partition the day's queue without coordination. Allocation is a
//! read-modify-write on the property store under the key's mutex (5 s
//! acquisition timeout); a stored date that isn't today resets the counter
//! before allocating.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fso_properties::{keys, PropertyStore};

use crate::schedule::jst_date;

const LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunIndexState {
    /// JST calendar date the counter belongs to (`YYYY-MM-DD`).
    pub date: String,
    pub counter: u32,
    pub updated_at: String,
}

/// Allocate `run_total` indices for `targeting_id` and return the base —
/// the counter value before the call.
pub async fn allocate(
    props: &PropertyStore,
    targeting_id: i64,
    run_total: u32,
    now: DateTime<Utc>,
) -> fso_domain::Result<u32> {
    let today = jst_date(now).format("%Y-%m-%d").to_string();
    let key = keys::run_index_state(targeting_id);

    props
        .update(&key, LOCK_WAIT, move |current| {
            let state = current
                .as_deref()
                .and_then(|raw| serde_json::from_str::<RunIndexState>(raw).ok())
                .filter(|s| s.date == today);
            let base = state.map(|s| s.counter).unwrap_or(0);
            let next = RunIndexState {
                date: today,
                counter: base + run_total,
                updated_at: now.to_rfc3339(),
            };
            let raw = serde_json::to_string(&next).unwrap_or_default();
            (Some(raw), base)
        })
        .await
}
