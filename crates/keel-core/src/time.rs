//! UTC timestamp normalization.
//!
//! All persisted and serialized timestamps are UTC, truncated to
//! microseconds, rendered with a trailing `Z`. Calendar dates (snapshot
//! dates, as-of dates) are plain ISO `YYYY-MM-DD`.

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Timelike, Utc};

use crate::error::KeelError;

/// Parse an RFC 3339 timestamp (`Z` or numeric offset) into UTC with
/// microsecond truncation.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, KeelError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| KeelError::InvalidTimestamp(format!("{raw}: {e}")))?;
    Ok(truncate_micros(parsed.with_timezone(&Utc)))
}

/// Canonical `%Y-%m-%dT%H:%M:%S%.6fZ` rendering.
pub fn format_utc(ts: DateTime<Utc>) -> String {
    truncate_micros(ts).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current instant, microsecond-truncated.
pub fn now_utc() -> DateTime<Utc> {
    truncate_micros(Utc::now())
}

fn truncate_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let micros = ts.timestamp_subsec_micros();
    ts.with_nanosecond(micros * 1_000).unwrap_or(ts)
}

/// Accounting period key (`YYYY-MM`) for a transaction date.
pub fn period_key_for(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}

/// Parse a calendar date (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> Result<NaiveDate, KeelError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| KeelError::InvalidTimestamp(format!("{raw}: {e}")))
}

/// True when `key` is a well-formed `YYYY-MM` period key.
pub fn is_period_key(key: &str) -> bool {
    let bytes = key.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    if !key[..4].bytes().all(|b| b.is_ascii_digit()) || !key[5..].bytes().all(|b| b.is_ascii_digit())
    {
        return false;
    }
    matches!(key[5..].parse::<u32>(), Ok(m) if (1..=12).contains(&m))
}
