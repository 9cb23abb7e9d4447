//! Civil-time helpers. Every "daily" concept (quota windows, digest dates,
//! job schedules) is computed in the configured timezone; persisted
//! timestamps stay in UTC.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Civil date of `now` in the given zone.
pub fn civil_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// UTC instant of local midnight starting the given civil day. A midnight
/// erased by a DST transition resolves to the earliest valid instant after
/// it.
pub fn day_start_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// Half-open UTC interval `[start, end)` covering the civil day in the zone.
pub fn day_bounds_utc(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (day_start_utc(date, tz), day_start_utc(date.succ_opt().unwrap_or(date), tz))
}

/// Whole hours from `now` until the next local midnight, floored, at least 1.
pub fn hours_until_midnight(now: DateTime<Utc>, tz: Tz) -> i64 {
    let today = civil_date(now, tz);
    let next_midnight = day_start_utc(today.succ_opt().unwrap_or(today), tz);
    (next_midnight - now).num_hours().max(1)
}

/// Next UTC instant at which the local wall clock reads `hour:minute`. If
/// that time has already passed today, the occurrence is tomorrow.
pub fn next_occurrence(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let today = local_now.date_naive();

    for offset in 0..3 {
        let date = today + Duration::days(offset);
        let naive = match date.and_hms_opt(hour, minute, 0) {
            Some(naive) => naive,
            None => continue,
        };
        let candidate = match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(first, _) => first,
            LocalResult::None => continue,
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > now {
            return candidate;
        }
    }

    // Unreachable with a sane zone database; fall back to one day out.
    now + Duration::days(1)
}
