//! Trigger runner — fires due one-shot triggers on a fixed tick.

use std::time::Duration;

use chrono::Utc;

use crate::runtime::handlers;
use crate::state::AppState;

pub struct TriggerRunner;

impl TriggerRunner {
    /// Evaluate due triggers once. Each fired trigger is removed before its
    /// handler runs, so a crashing handler cannot cause a refire storm.
    pub async fn tick(state: &AppState, now: chrono::DateTime<Utc>) -> usize {
        let due = state.triggers.due(now).await;
        let count = due.len();
        for trigger in due {
            if let Err(e) = state.triggers.delete_by_id(trigger.id).await {
                tracing::warn!(id = %trigger.id, error = %e, "failed to pop fired trigger");
            }
            tracing::info!(
                handler = %trigger.handler,
                fire_at = %trigger.fire_at,
                "firing trigger"
            );
            match handlers::run_handler(state, &trigger.handler, now).await {
                Ok(summary) => {
                    tracing::info!(handler = %trigger.handler, %summary, "handler finished");
                }
                Err(e) => {
                    tracing::error!(handler = %trigger.handler, error = %e, "handler failed");
                }
            }
        }
        count
    }

    /// Serve-mode loop: tick forever at the configured interval.
    pub async fn run_loop(state: AppState, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "trigger runner started");
        loop {
            Self::tick(&state, Utc::now()).await;
            tokio::time::sleep(interval).await;
        }
    }
}
