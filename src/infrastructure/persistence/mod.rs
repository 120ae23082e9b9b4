pub mod database;
pub mod feature_import;
pub mod repositories;

pub use database::Database;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

/// Timestamps are stored as INTEGER unix seconds
pub(crate) fn datetime_from_unix(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| anyhow!("Invalid unix timestamp: {}", secs))
}

pub(crate) fn optional_datetime(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(datetime_from_unix).transpose()
}
