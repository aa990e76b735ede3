//! # Repository Module
//!
//! Database repository implementations for the sync engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  binaa-sync component                                                  │
//! │       │                                                                 │
//! │       │  db.records().changed_since("field_visits", "updated_at", ..)  │
//! │       ▼                                                                 │
//! │  RecordRepository                                                      │
//! │  ├── pool methods   (&self, ...)          one statement, own conn      │
//! │  └── *_with_tx      (tx: &mut SqliteConnection, ...)                   │
//! │                      composed by the engine inside one transaction     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamps
//! Every timestamp is written by [`db_timestamp`] as fixed-width UTC text.
//! Watermark and stale-session comparisons happen in SQL on that text, so
//! the format must never vary between rows.
//!
//! ## Available Repositories
//!
//! - [`devices::DeviceRepository`] - Device registration and activation
//! - [`sessions::SessionRepository`] - Sync session lifecycle
//! - [`operations::OperationRepository`] - Offline operation log
//! - [`conflicts::ConflictRepository`] - Conflict capture and resolution
//! - [`geography::GeographyRepository`] - Hierarchy and assignments
//! - [`records::RecordRepository`] - Rows of synchronized tables

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::error::DbResult;

pub mod conflicts;
pub mod devices;
pub mod geography;
pub mod operations;
pub mod records;
pub mod sessions;

/// Current server time at the precision stored in the database.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Formats a timestamp for storage: `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
pub fn db_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn opt_timestamp(at: Option<&DateTime<Utc>>) -> Option<String> {
    at.map(db_timestamp)
}

pub(crate) fn encode_json(value: Option<&Value>) -> DbResult<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

pub(crate) fn decode_json(text: Option<String>) -> DbResult<Option<Value>> {
    text.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width_and_ordered() {
        let whole = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let later = whole + chrono::Duration::microseconds(1);

        let a = db_timestamp(&whole);
        let b = db_timestamp(&later);
        assert_eq!(a, "2026-03-01T10:00:00.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_now_round_trips_through_storage_format() {
        let at = now();
        let parsed = DateTime::parse_from_rfc3339(&db_timestamp(&at))
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parsed, at);
    }
}
