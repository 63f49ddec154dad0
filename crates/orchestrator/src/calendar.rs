//! Business-day predicate for JST with per-run holiday memoization.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};

use fso_google::calendar::HolidayLookup;

/// Weekend check in the source's day numbering: Sunday = 0, Saturday = 6.
pub fn is_weekend(date: NaiveDate) -> bool {
    let dow = date.weekday().num_days_from_sunday();
    dow == 0 || dow == 6
}

/// Holiday-aware calendar. Lookups are memoized per `yyyy-MM-dd` for the
/// lifetime of the invocation, so a handler never queries the provider
/// twice for the same date.
pub struct Calendar {
    lookup: Arc<dyn HolidayLookup>,
    memo: parking_lot::Mutex<HashMap<NaiveDate, Option<bool>>>,
}

impl Calendar {
    pub fn new(lookup: Arc<dyn HolidayLookup>) -> Self {
        Self {
            lookup,
            memo: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Holiday query with memoization. `None` = provider unavailable.
    pub async fn is_holiday_jst(&self, date: NaiveDate) -> Option<bool> {
        if let Some(cached) = self.memo.lock().get(&date) {
            return *cached;
        }
        let result = self.lookup.is_holiday(date).await;
        self.memo.lock().insert(date, result);
        result
    }

    /// Business day = not a weekend and not a known holiday.
    ///
    /// When the holiday provider is unavailable the date counts as a
    /// business day (fail-open); the degradation is logged, never silent.
    pub async fn is_business_day_jst(&self, date: NaiveDate) -> bool {
        if is_weekend(date) {
            return false;
        }
        match self.is_holiday_jst(date).await {
            Some(holiday) => !holiday,
            None => {
                tracing::warn!(%date, "holiday provider unavailable, assuming business day");
                true
            }
        }
    }
}

/// Fixed holiday set. Serves offline runs (no calendar configured) and
/// test fixtures.
#[derive(Default)]
pub struct StaticHolidays {
    days: HashSet<NaiveDate>,
    /// When true, every lookup reports the provider as unavailable.
    pub unavailable: bool,
}

impl StaticHolidays {
    pub fn new(days: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            days: days.into_iter().collect(),
            unavailable: false,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HolidayLookup for StaticHolidays {
    async fn is_holiday(&self, date: NaiveDate) -> Option<bool> {
        if self.unavailable {
            return None;
        }
        Some(self.days.contains(&date))
    }
}
