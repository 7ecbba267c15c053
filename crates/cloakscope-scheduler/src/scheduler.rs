//! Job scheduling — determines when recurring work is due and when it runs next.

use crate::jobs::Recurrence;
use chrono::{DateTime, Days, Months, NaiveTime, Utc};

/// Hour of day (UTC) at which recurring audits run.
pub const RUN_HOUR_UTC: u32 = 2;

/// Returns true if `next_run_at` is in the past relative to `now`.
pub fn is_job_due(next_run_at: &str, now: &str) -> bool {
    let next = DateTime::parse_from_rfc3339(next_run_at).ok();
    let current = DateTime::parse_from_rfc3339(now).ok();
    match (next, current) {
        (Some(n), Some(c)) => n <= c,
        _ => false,
    }
}

/// Next run time for `recurrence`, counted from the calendar day of `now`
/// and pinned to 02:00 UTC.
///
/// Daily moves one day, weekly seven, monthly one calendar month (clamped to
/// the end of shorter months).
#[must_use]
pub fn next_run_after(recurrence: Recurrence, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let day = match recurrence {
        Recurrence::Daily => today.checked_add_days(Days::new(1)),
        Recurrence::Weekly => today.checked_add_days(Days::new(7)),
        Recurrence::Monthly => today.checked_add_months(Months::new(1)),
    }
    .unwrap_or(today);

    let run_time = NaiveTime::from_hms_opt(RUN_HOUR_UTC, 0, 0).unwrap_or(NaiveTime::MIN);
    day.and_time(run_time).and_utc()
}
