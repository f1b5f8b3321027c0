use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::model::{DateRange, Day};

use super::EngineError;

// ── Interval utilities ────────────────────────────────────────────
//
// All date math lives here. Nothing else parses date strings or does
// arithmetic on them.

/// Calendar date of an instant as seen in `tz`, i.e. the local midnight it falls after.
pub fn normalize_to_local_midnight<Tz: TimeZone>(instant: &DateTime<Utc>, tz: &Tz) -> Day {
    instant.with_timezone(tz).date_naive()
}

/// Signed whole days from `a` to `b`. Calendar dates carry no offset, so DST cannot skew it.
pub fn days_between(a: Day, b: Day) -> i64 {
    (b - a).num_days()
}

/// Lazily yield every day in `[start, end)`.
///
/// Callers wanting an inclusive end pass `end + 1 day`.
pub fn expand_range(start: Day, end: Day) -> Result<impl Iterator<Item = Day>, EngineError> {
    if end < start {
        return Err(EngineError::InvalidRange { start, end });
    }
    Ok(start.iter_days().take_while(move |d| *d < end))
}

/// Same as [`expand_range`] for an already-validated range.
pub fn days_of(range: &DateRange) -> impl Iterator<Item = Day> + use<> {
    let end = range.end;
    range.start.iter_days().take_while(move |d| *d < end)
}

pub fn next_day(day: Day) -> Day {
    day.succ_opt().unwrap_or(NaiveDate::MAX)
}

/// Parse `YYYY-MM-DD`, dropping any time-of-day suffix
/// (`2026-02-13T15:00:00Z`, `2026-02-13 15:00`).
pub fn parse_day(s: &str) -> Result<Day, EngineError> {
    let trimmed = s.trim();
    let date_part = trimmed
        .split(['T', ' '])
        .next()
        .unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidRecord(format!("invalid date '{s}', expected YYYY-MM-DD")))
}
