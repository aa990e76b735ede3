//! # Error Types
//!
//! Domain-specific error types for binaa-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  binaa-core errors (this file)                                         │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures (field-level)        │
//! │                                                                         │
//! │  binaa-db errors                                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  binaa-sync errors                                                     │
//! │  └── SyncError        - Engine failures, device/session gating         │
//! │                                                                         │
//! │  sync-api errors                                                       │
//! │  └── ApiError         - What the device sees (JSON + status code)      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → ApiError → Device     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The table is not registered for synchronization.
    #[error("Table is not synchronized: {0}")]
    UnknownTable(String),

    /// A stored value could not be mapped back to a domain enum.
    ///
    /// ## When This Occurs
    /// - A row was written by a newer schema version
    /// - Manual edits to status columns
    #[error("Invalid {kind} value: {value}")]
    InvalidEnumValue { kind: &'static str, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Every variant names the offending field so the device can point the
/// surveyor at the exact input to fix before retrying.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Coordinate outside the valid WGS84 range.
    #[error("{field} must be between {min} and {max}")]
    CoordinateOutOfRange { field: String, min: f64, max: f64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid identifier).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Operation kind is not permitted on this table.
    #[error("{operation} is not permitted on {table}")]
    OperationNotPermitted { table: String, operation: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidFormat`].
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the name of the field that failed validation.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::CoordinateOutOfRange { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::NotAllowed { field, .. } => field,
            ValidationError::OperationNotPermitted { .. } => "operation",
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::required("record_id");
        assert_eq!(err.to_string(), "record_id is required");

        let err = ValidationError::CoordinateOutOfRange {
            field: "latitude".to_string(),
            min: -90.0,
            max: 90.0,
        };
        assert_eq!(err.to_string(), "latitude must be between -90 and 90");
    }

    #[test]
    fn test_field_accessor() {
        let err = ValidationError::invalid_format("table", "unexpected character");
        assert_eq!(err.field(), "table");

        let err = ValidationError::OperationNotPermitted {
            table: "survey_points".into(),
            operation: "update".into(),
        };
        assert_eq!(err.field(), "operation");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
