//! Timestamp helpers for the wire format.
//!
//! Progress events carry ISO 8601 timestamps as strings so that any
//! consumer can display them without parsing; internal bookkeeping uses
//! `chrono::DateTime<Utc>`.

use chrono::{DateTime, Utc};

/// A UTC timestamp used for run and stage bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// Format: `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a timestamp in the same ISO 8601 shape as [`iso_timestamp`].
#[must_use]
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}
