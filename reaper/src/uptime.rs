//! Uptime window arithmetic. All timestamps are seconds since the epoch;
//! wall-clock values are interpreted in the configured zone.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;

use crate::types::WINDOW_HOURS;

/// The most recent past weekday occurrence of `start_hour`, truncated to the
/// top of the hour. Saturday and Sunday never count as occurrences: an hour
/// that lands on a weekend resolves to the preceding Friday. Returns 0 when
/// no start hour is configured.
pub fn last_scheduled(start_hour: Option<u32>, now: &DateTime<Tz>) -> i64 {
    let Some(hour) = start_hour else {
        return 0;
    };
    let mut day = now.date_naive();
    if hour > now.hour() {
        day -= Duration::days(1);
    }
    while matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day -= Duration::days(1);
    }
    day.and_hms_opt(hour, 0, 0)
        .and_then(|t| now.timezone().from_local_datetime(&t).earliest())
        .map(|t| t.timestamp())
        .unwrap_or(0)
}

/// Seconds left in the uptime window that opened at `started`, clamped at 0.
pub fn remaining_seconds(started: i64, now: i64) -> i64 {
    (started + WINDOW_HOURS * 60 * 60 - now).max(0)
}

/// Render a number of remaining seconds for the UI. Values outside the
/// window render as the empty string.
pub fn format_remaining(seconds: i64) -> String {
    let m = seconds / 60;
    let h = (m / 60) % WINDOW_HOURS;
    if m <= 0 || m >= WINDOW_HOURS * 60 {
        return String::new();
    }
    if h > 0 {
        format!("{}h {:02}m", h, m % 60)
    } else {
        format!("{}m", m % 60)
    }
}

/// Whole hours from `earlier` to `later`, truncated toward zero.
pub fn hours_between(earlier: i64, later: i64) -> i64 {
    (later - earlier) / (60 * 60)
}
