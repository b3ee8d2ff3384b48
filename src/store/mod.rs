//! Storage adapter.
//!
//! Row-level persistence for items, image references, match candidates and
//! users, plus the [`images::ImageStore`] seam in front of blob storage. No
//! business rules live here: callers (the catalog, the index, the matching
//! worker) decide what to write and inside which transaction.

pub mod images;
pub mod items;
pub mod matches;
pub mod retry;
pub mod users;

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

/// Epoch milliseconds, the on-disk timestamp representation.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Current time at storage precision, so values read back compare equal.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

pub fn from_millis(ms: i64) -> AppResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("stored timestamp out of range: {}", ms)))
}

/// Parses a value stored as text back into its typed form.
pub(crate) fn parse_column<T>(column: &str, raw: &str) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt {} column '{}': {}", column, raw, e)))
}
