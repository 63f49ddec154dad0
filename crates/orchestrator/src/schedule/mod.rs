//! Trigger scheduling: holiday-aware time arithmetic, the persisted
//! one-shot trigger store, and the tick runner that fires due handlers.

mod runner;
mod time;
mod triggers;

pub use runner::TriggerRunner;
pub use time::{at_hour_jst, jst_date, jst_now, next_execution_time, next_weekday_time_at, MAX_SKIP_DAYS};
pub use triggers::{Trigger, TriggerStore};
