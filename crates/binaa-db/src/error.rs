//! # Storage Errors
//!
//! ```text
//!   sqlx::Error ──► DbError ──► SyncError::Database ──► 503 (transient) / 500
//! ```
//!
//! Constraint failures keep their own variants: the engine turns a
//! duplicate record id or a second open conflict into a per-operation
//! outcome instead of failing the whole push.

use sqlx::error::ErrorKind;
use thiserror::Error;

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum DbError {
    /// A device, session, operation or conflict id that isn't stored.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Duplicate record id, operation id, or a second unresolved conflict
    /// for one operation.
    #[error("Unique constraint failed: {constraint}")]
    UniqueViolation { constraint: String },

    /// A session for an unknown device, an operation for an unknown session.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// Another push held the write lock past the busy timeout.
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// A stored record or conflict payload is not valid JSON.
    #[error("Invalid stored payload: {0}")]
    InvalidPayload(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Failures a device should retry on its next sync.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Busy(_)
                | DbError::PoolExhausted
                | DbError::ConnectionFailed(_)
                | DbError::TransactionFailed(_)
        )
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),

            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.kind() {
                    ErrorKind::UniqueViolation => DbError::UniqueViolation {
                        constraint: message
                            .strip_prefix("UNIQUE constraint failed: ")
                            .unwrap_or(&message)
                            .to_string(),
                    },
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation { message },
                    _ if is_busy(db_err.code().as_deref()) => DbError::Busy(message),
                    _ => DbError::QueryFailed(message),
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),

            other => DbError::Internal(other.to_string()),
        }
    }
}

/// Extended result codes keep the primary code in the low byte.
fn is_busy(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::InvalidPayload(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
