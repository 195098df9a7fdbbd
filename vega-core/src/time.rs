//! Timestamp formatting
//!
//! The store keeps all timestamps as UTC TEXT columns in a single fixed
//! format. The format sorts lexicographically in chronological order,
//! which the newest-first product queries rely on.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Storage format for every timestamp column.
pub const STRFTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a datetime in store format.
pub fn to_stamp(dt: DateTime<Utc>) -> String {
    dt.format(STRFTIME_FORMAT).to_string()
}

/// Parse a store-format timestamp back into a UTC datetime.
pub fn from_stamp(stamp: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(stamp, STRFTIME_FORMAT).map(|naive| naive.and_utc())
}
