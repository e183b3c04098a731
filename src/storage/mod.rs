//! Embedded SQLite store: accounts, sessions, submissions, payments and counters

pub mod accounts;
pub mod db;
pub mod meta;
pub mod migrations;
pub mod payments;
pub mod sessions;
pub mod submissions;

use chrono::{DateTime, NaiveDateTime, Utc};

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};

/// Storage format of every timestamp column (UTC, lexicographically ordered)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// `%.f` also reads rows written before millisecond precision
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp; unparsable values read as absent.
pub fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_PARSE_FORMAT).ok())
        .map(|naive| naive.and_utc())
}
