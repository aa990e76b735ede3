//! # Sync Error Types
//!
//! Error types for engine operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Input       │  │     Authorization       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Validation     │  │  Forbidden              │ │
//! │  │                 │  │  UnknownTable   │  │  DeviceOwnedByOther     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Devices      │  │    Sessions     │  │      Conflicts          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DeviceNotFound │  │  SessionNotFound│  │  ConflictNotFound       │ │
//! │  │  DeviceInactive │  │  SessionNotActive│ │  ConflictAlreadyResolved│ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Database(DbError) ─ storage failures, transient ones retryable        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-operation failures inside a push batch never surface here: they are
//! reported as operation outcomes.

use binaa_core::{SessionStatus, ValidationError};
use binaa_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering request-level failures of the engine.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine settings.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Request input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Table is not registered for synchronization.
    #[error("Table is not synchronized: {0}")]
    UnknownTable(String),

    // =========================================================================
    // Authorization Errors
    // =========================================================================
    /// Caller may not perform this action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device was deactivated and may no longer sync.
    #[error("Device {0} is deactivated")]
    DeviceInactive(String),

    /// Device id is registered to a different user.
    #[error("Device {0} is registered to another user")]
    DeviceOwnedByOther(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Sync session not found: {0}")]
    SessionNotFound(String),

    /// Session already completed or failed.
    #[error("Sync session {id} is {status:?}, expected active")]
    SessionNotActive { id: String, status: SessionStatus },

    // =========================================================================
    // Conflict Errors
    // =========================================================================
    #[error("Sync conflict not found: {0}")]
    ConflictNotFound(String),

    /// Resolutions are final.
    #[error("Sync conflict {0} is already resolved")]
    ConflictAlreadyResolved(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the device should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Database(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if the error names a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::DeviceNotFound(_)
                | SyncError::SessionNotFound(_)
                | SyncError::ConflictNotFound(_)
        )
    }

    /// Returns true if the request collided with the current state of an
    /// entity (finished session, resolved conflict, foreign device).
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::SessionNotActive { .. }
                | SyncError::ConflictAlreadyResolved(_)
                | SyncError::DeviceOwnedByOther(_)
        )
    }

    /// Returns true if the caller lacks permission.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, SyncError::Forbidden(_) | SyncError::DeviceInactive(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert!(SyncError::Database(DbError::PoolExhausted).is_retryable());
        assert!(!SyncError::Database(DbError::QueryFailed("syntax".into())).is_retryable());
        assert!(!SyncError::ConflictAlreadyResolved("c-1".into()).is_retryable());

        assert!(SyncError::SessionNotFound("s-1".into()).is_not_found());
        assert!(SyncError::SessionNotActive {
            id: "s-1".into(),
            status: SessionStatus::Completed,
        }
        .is_state_conflict());
        assert!(SyncError::DeviceInactive("tab-1".into()).is_forbidden());
    }

    #[test]
    fn test_validation_passthrough() {
        let err: SyncError = ValidationError::required("device_id").into();
        assert_eq!(err.to_string(), ValidationError::required("device_id").to_string());
    }
}
