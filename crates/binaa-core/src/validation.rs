//! # Validation Module
//!
//! Input validation for everything a device sends.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Mobile app                                                   │
//! │  └── Form checks before queueing                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: sync-api (Rust)                                              │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── THIS MODULE: identifiers, operations, coordinates                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SyncTable::validate_payload                                  │
//! │  └── Table-specific payload rules                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Database (SQLite)                                            │
//! │  └── NOT NULL, CHECK, foreign keys                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use binaa_core::validation::{validate_table_name, validate_page_limit};
//!
//! validate_table_name("field_visits").unwrap();
//! assert_eq!(validate_page_limit(None, 5000).unwrap(), 500);
//! ```

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{OperationKind, QueuedOperation, SessionStats};
use crate::{DEFAULT_PAGE_LIMIT, MAX_BATCH_OPERATIONS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest identifier accepted from a device (ids, table names).
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Longest free-text label (strategy, platform).
pub const MAX_LABEL_LEN: usize = 64;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an opaque identifier (device id, record id, location id).
///
/// ## Rules
/// - Must not be empty
/// - At most 128 characters
/// - ASCII alphanumerics, `-`, `_`, `.` and `:` only
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::invalid_format(
            field,
            "only letters, digits, '-', '_', '.' and ':' are allowed",
        ));
    }
    Ok(())
}

/// Validates a table name shape: lowercase snake_case starting with a letter.
///
/// Passing this does not mean the table is synchronized; the registry
/// decides that.
pub fn validate_table_name(value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::required("table"));
    }
    if value.len() > MAX_LABEL_LEN {
        return Err(ValidationError::TooLong {
            field: "table".to_string(),
            max: MAX_LABEL_LEN,
        });
    }
    let mut chars = value.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    if !starts_with_letter || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ValidationError::invalid_format("table", "expected snake_case identifier"));
    }
    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(field: &str, value: &str) -> ValidationResult<()> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ValidationError::invalid_format(field, "expected a UUID"))
}

/// Validates a short free-text label.
pub fn validate_label(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.chars().count() > MAX_LABEL_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_LABEL_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Resolves the page size for a differential pull.
///
/// `None` gives [`DEFAULT_PAGE_LIMIT`] (capped by `max`); values above `max`
/// are clamped; zero is rejected.
pub fn validate_page_limit(limit: Option<u32>, max: u32) -> ValidationResult<u32> {
    match limit {
        None => Ok(DEFAULT_PAGE_LIMIT.min(max)),
        Some(0) => Err(ValidationError::MustBePositive {
            field: "limit".to_string(),
        }),
        Some(n) => Ok(n.min(max)),
    }
}

/// Validates a WGS84 coordinate pair.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> ValidationResult<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(ValidationError::CoordinateOutOfRange {
            field: "latitude".to_string(),
            min: -90.0,
            max: 90.0,
        });
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(ValidationError::CoordinateOutOfRange {
            field: "longitude".to_string(),
            min: -180.0,
            max: 180.0,
        });
    }
    Ok(())
}

/// Validates session counters reported at completion.
///
/// All must be non-negative and the three outcome counters must sum to the
/// total.
pub fn validate_session_stats(stats: &SessionStats) -> ValidationResult<()> {
    for (field, value) in [
        ("total_operations", stats.total_operations),
        ("successful_operations", stats.successful_operations),
        ("failed_operations", stats.failed_operations),
        ("conflict_operations", stats.conflict_operations),
    ] {
        if value < 0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                min: 0,
                max: i64::MAX,
            });
        }
    }

    let sum = stats.successful_operations + stats.failed_operations + stats.conflict_operations;
    if sum != stats.total_operations {
        return Err(ValidationError::invalid_format(
            "total_operations",
            format!("expected {} (sum of outcome counters)", sum),
        ));
    }
    Ok(())
}

// =============================================================================
// Operation Validators
// =============================================================================

/// Validates the size of a push batch.
pub fn validate_batch_size(count: usize) -> ValidationResult<()> {
    if count > MAX_BATCH_OPERATIONS {
        return Err(ValidationError::OutOfRange {
            field: "operations".to_string(),
            min: 0,
            max: MAX_BATCH_OPERATIONS as i64,
        });
    }
    Ok(())
}

/// Validates the shape of a queued operation.
///
/// ## Rules
/// - `id` is a UUID, `record_id` a valid identifier
/// - create and update carry an object `after_data`
/// - update and delete carry a `base_version` of at least 1
pub fn validate_queued_operation(op: &QueuedOperation) -> ValidationResult<()> {
    validate_uuid("id", &op.id)?;
    validate_identifier("record_id", &op.record_id)?;

    match op.kind {
        OperationKind::Create | OperationKind::Update => match &op.after_data {
            Some(Value::Object(_)) => {}
            Some(_) => {
                return Err(ValidationError::invalid_format(
                    "after_data",
                    "expected a JSON object",
                ))
            }
            None => return Err(ValidationError::required("after_data")),
        },
        OperationKind::Delete => {}
    }

    if matches!(op.kind, OperationKind::Update | OperationKind::Delete) {
        match op.base_version {
            Some(v) if v >= 1 => {}
            Some(_) => {
                return Err(ValidationError::MustBePositive {
                    field: "base_version".to_string(),
                })
            }
            None => return Err(ValidationError::required("base_version")),
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn op(kind: OperationKind, base_version: Option<i64>, after: Option<Value>) -> QueuedOperation {
        QueuedOperation {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: "visit-1".to_string(),
            kind,
            local_timestamp: Utc::now(),
            base_version,
            before_data: None,
            after_data: after,
        }
    }

    #[test]
    fn test_identifier() {
        assert!(validate_identifier("device_id", "pixel-7:abc.1").is_ok());
        assert!(validate_identifier("device_id", "").is_err());
        assert!(validate_identifier("device_id", "a b").is_err());
        assert!(validate_identifier("device_id", "x'; DROP TABLE").is_err());
        assert!(validate_identifier("device_id", &"a".repeat(129)).is_err());
    }

    #[test]
    fn test_table_name() {
        assert!(validate_table_name("field_visits").is_ok());
        assert!(validate_table_name("FieldVisits").is_err());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("visits; --").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_page_limit() {
        assert_eq!(validate_page_limit(None, 5000).unwrap(), 500);
        assert_eq!(validate_page_limit(None, 100).unwrap(), 100);
        assert_eq!(validate_page_limit(Some(9000), 5000).unwrap(), 5000);
        assert_eq!(validate_page_limit(Some(20), 5000).unwrap(), 20);
        assert!(validate_page_limit(Some(0), 5000).is_err());
    }

    #[test]
    fn test_coordinates() {
        assert!(validate_coordinates(15.3694, 44.191).is_ok());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.01, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_session_stats() {
        let ok = SessionStats {
            total_operations: 3,
            successful_operations: 1,
            failed_operations: 1,
            conflict_operations: 1,
        };
        assert!(validate_session_stats(&ok).is_ok());

        let mismatched = SessionStats {
            total_operations: 4,
            ..ok
        };
        assert!(validate_session_stats(&mismatched).is_err());

        let negative = SessionStats {
            total_operations: 0,
            successful_operations: 1,
            failed_operations: -1,
            conflict_operations: 0,
        };
        assert_eq!(
            validate_session_stats(&negative).unwrap_err().field(),
            "failed_operations"
        );
    }

    #[test]
    fn test_queued_operation_rules() {
        assert!(validate_queued_operation(&op(OperationKind::Create, None, Some(json!({"a": 1})))).is_ok());
        assert!(validate_queued_operation(&op(OperationKind::Create, None, None)).is_err());
        assert!(validate_queued_operation(&op(OperationKind::Create, None, Some(json!([1])))).is_err());

        assert!(validate_queued_operation(&op(OperationKind::Update, Some(1), Some(json!({})))).is_ok());
        assert_eq!(
            validate_queued_operation(&op(OperationKind::Update, None, Some(json!({})))).unwrap_err(),
            ValidationError::required("base_version")
        );

        assert!(validate_queued_operation(&op(OperationKind::Delete, Some(2), None)).is_ok());
        assert!(validate_queued_operation(&op(OperationKind::Delete, Some(0), None)).is_err());

        let mut bad_id = op(OperationKind::Delete, Some(1), None);
        bad_id.id = "not-a-uuid".to_string();
        assert_eq!(validate_queued_operation(&bad_id).unwrap_err().field(), "id");
    }

    #[test]
    fn test_batch_size() {
        assert!(validate_batch_size(0).is_ok());
        assert!(validate_batch_size(MAX_BATCH_OPERATIONS).is_ok());
        assert!(validate_batch_size(MAX_BATCH_OPERATIONS + 1).is_err());
    }
}
