//! Next-execution-instant arithmetic in JST.
//!
//! Both the per-hour reschedulers and the generic one share the calendar's
//! business-day predicate; weekend handling exists in exactly one place.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Asia::Tokyo;
use chrono_tz::Tz;

use crate::calendar::{is_weekend, Calendar};

/// Upper bound on consecutive skipped days while searching for a business
/// day. Past the cap the result may be a holiday, but never a weekend.
pub const MAX_SKIP_DAYS: u32 = 10;

/// Current instant in JST.
pub fn jst_now(now_utc: DateTime<Utc>) -> DateTime<Tz> {
    now_utc.with_timezone(&Tokyo)
}

/// Today's JST calendar date.
pub fn jst_date(now_utc: DateTime<Utc>) -> NaiveDate {
    jst_now(now_utc).date_naive()
}

/// `date` at `hour:00:00` JST. JST has no DST, so the mapping is total;
/// the midnight fallback only guards impossible inputs.
pub fn at_hour_jst(date: NaiveDate, hour: u32) -> DateTime<Tz> {
    date.and_hms_opt(hour, 0, 0)
        .and_then(|naive| Tokyo.from_local_datetime(&naive).single())
        .unwrap_or_else(|| Tokyo.from_utc_datetime(&date.and_time(Default::default())))
}

/// Next business-day instant at `hour:00` JST, starting from tomorrow.
///
/// Skips weekends and holidays one day at a time up to [`MAX_SKIP_DAYS`];
/// past the cap, weekends are still pushed forward to Monday.
pub async fn next_weekday_time_at(
    calendar: &Calendar,
    hour: u32,
    now_jst: DateTime<Tz>,
) -> DateTime<Tz> {
    let mut date = now_jst.date_naive() + Duration::days(1);
    for _ in 0..MAX_SKIP_DAYS {
        if calendar.is_business_day_jst(date).await {
            return at_hour_jst(date, hour);
        }
        date += Duration::days(1);
    }
    while is_weekend(date) {
        date += Duration::days(1);
    }
    at_hour_jst(date, hour)
}

/// Next execution instant preserving the source handler's hour.
pub async fn next_execution_time(calendar: &Calendar, now_jst: DateTime<Tz>) -> DateTime<Tz> {
    use chrono::Timelike;
    next_weekday_time_at(calendar, now_jst.hour(), now_jst).await
}
