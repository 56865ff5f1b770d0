//! Trading-day and trading-week keys.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};

/// Calendar day a timestamp belongs to; daily loss limits reset on change.
pub fn day_key(ts: DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

/// ISO (year, week) a timestamp belongs to; weekly trade caps reset on change.
pub fn week_key(ts: DateTime<Utc>) -> (i32, u32) {
    let week = ts.iso_week();
    (week.year(), week.week())
}

/// Weekends, New Year's Day and Christmas Day are closed.
pub fn is_trading_day(ts: DateTime<Utc>) -> bool {
    if matches!(ts.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    !matches!((ts.month(), ts.day()), (1, 1) | (12, 25))
}
