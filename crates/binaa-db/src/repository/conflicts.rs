//! # Sync Conflict Repository
//!
//! ## Resolution Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │          SINGLE TRANSACTION (BEGIN IMMEDIATE, then read the clock)     │
//! │                                                                         │
//! │  1. UPDATE sync_conflicts SET status = 'resolved', ...                 │
//! │     WHERE id = ? AND status = 'unresolved'     (0 rows ⇒ abort)        │
//! │                                                                         │
//! │  2a. resolved_data is JSON null ⇒ DELETE FROM <table> WHERE id = ?     │
//! │  2b. otherwise                  ⇒ UPSERT <table>, version + 1          │
//! │                                                                         │
//! │  COMMIT ← the conflict flips and the record changes together           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An operation has at most one unresolved conflict (partial unique index
//! on `operation_id`). A retry that conflicts again refreshes it in place.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::pool::begin_write;
use crate::repository::records::RecordRepository;
use crate::repository::{db_timestamp, decode_json, encode_json, now, opt_timestamp};
use binaa_core::{ConflictStatus, ConflictType, SyncConflict, SyncRecord};

const CONFLICT_COLUMNS: &str = "id, session_id, operation_id, table_name, record_id, conflict_type, \
     client_data, server_data, status, resolution_strategy, resolved_data, resolved_by, \
     resolved_at, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    id: String,
    session_id: String,
    operation_id: String,
    table_name: String,
    record_id: String,
    conflict_type: ConflictType,
    client_data: Option<String>,
    server_data: Option<String>,
    status: ConflictStatus,
    resolution_strategy: Option<String>,
    resolved_data: Option<String>,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConflictRow> for SyncConflict {
    type Error = DbError;

    fn try_from(row: ConflictRow) -> DbResult<Self> {
        Ok(SyncConflict {
            id: row.id,
            session_id: row.session_id,
            operation_id: row.operation_id,
            table_name: row.table_name,
            record_id: row.record_id,
            conflict_type: row.conflict_type,
            client_data: decode_json(row.client_data)?,
            server_data: decode_json(row.server_data)?,
            status: row.status,
            resolution_strategy: row.resolution_strategy,
            resolved_data: decode_json(row.resolved_data)?,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

/// How a resolution request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(SyncConflict),
    /// The conflict was already resolved; nothing was written.
    AlreadyResolved,
}

/// A resolution to commit.
#[derive(Debug, Clone)]
pub struct Resolution<'a> {
    pub strategy: &'a str,
    /// New state of the target record; JSON null deletes it.
    pub resolved_data: &'a Value,
    pub resolved_by: &'a str,
}

/// Repository for sync conflict operations.
#[derive(Debug, Clone)]
pub struct ConflictRepository {
    pool: SqlitePool,
}

impl ConflictRepository {
    /// Creates a new ConflictRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConflictRepository { pool }
    }

    /// Inserts a freshly raised conflict.
    pub async fn insert_with_tx(tx: &mut SqliteConnection, conflict: &SyncConflict) -> DbResult<()> {
        debug!(
            conflict_id = %conflict.id,
            operation_id = %conflict.operation_id,
            conflict_type = conflict.conflict_type.as_str(),
            "Recording sync conflict"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_conflicts (
                id, session_id, operation_id, table_name, record_id, conflict_type,
                client_data, server_data, status, resolution_strategy, resolved_data,
                resolved_by, resolved_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&conflict.id)
        .bind(&conflict.session_id)
        .bind(&conflict.operation_id)
        .bind(&conflict.table_name)
        .bind(&conflict.record_id)
        .bind(conflict.conflict_type)
        .bind(encode_json(conflict.client_data.as_ref())?)
        .bind(encode_json(conflict.server_data.as_ref())?)
        .bind(conflict.status)
        .bind(&conflict.resolution_strategy)
        .bind(encode_json(conflict.resolved_data.as_ref())?)
        .bind(&conflict.resolved_by)
        .bind(opt_timestamp(conflict.resolved_at.as_ref()))
        .bind(db_timestamp(&conflict.created_at))
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    /// The operation's open conflict, if any.
    pub async fn find_unresolved_for_operation_with_tx(
        tx: &mut SqliteConnection,
        operation_id: &str,
    ) -> DbResult<Option<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts \
             WHERE operation_id = ?1 AND status = ?2"
        );
        let row = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(operation_id)
            .bind(ConflictStatus::Unresolved)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(SyncConflict::try_from).transpose()
    }

    /// Rewrites an open conflict with what the latest retry saw.
    ///
    /// The conflict moves to `conflict.session_id`, the session that
    /// retried. Returns false when it is no longer unresolved.
    pub async fn refresh_with_tx(tx: &mut SqliteConnection, conflict: &SyncConflict) -> DbResult<bool> {
        debug!(
            conflict_id = %conflict.id,
            operation_id = %conflict.operation_id,
            conflict_type = conflict.conflict_type.as_str(),
            "Refreshing open sync conflict"
        );

        let result = sqlx::query(
            r#"
            UPDATE sync_conflicts SET
                session_id = ?2,
                conflict_type = ?3,
                client_data = ?4,
                server_data = ?5
            WHERE id = ?1 AND status = ?6
            "#,
        )
        .bind(&conflict.id)
        .bind(&conflict.session_id)
        .bind(conflict.conflict_type)
        .bind(encode_json(conflict.client_data.as_ref())?)
        .bind(encode_json(conflict.server_data.as_ref())?)
        .bind(ConflictStatus::Unresolved)
        .execute(&mut *tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Gets a conflict by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncConflict>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with_tx(&mut conn, id).await
    }

    async fn get_with_tx(tx: &mut SqliteConnection, id: &str) -> DbResult<Option<SyncConflict>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1");
        let row = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(SyncConflict::try_from).transpose()
    }

    /// Lists a session's unresolved conflicts, oldest first.
    pub async fn list_unresolved(&self, session_id: &str) -> DbResult<Vec<SyncConflict>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts \
             WHERE session_id = ?1 AND status = ?2 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ConflictRow>(&sql)
            .bind(session_id)
            .bind(ConflictStatus::Unresolved)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(SyncConflict::try_from).collect()
    }

    /// Resolves a conflict and commits the resolved record state.
    ///
    /// `table` must be the registered table the conflict belongs to. The
    /// resolution time (and the record's `updated_at`) is taken once the
    /// write lock is held.
    pub async fn resolve(
        &self,
        id: &str,
        table: &'static str,
        resolution: &Resolution<'_>,
    ) -> DbResult<ResolveOutcome> {
        let mut tx = begin_write(&self.pool).await?;
        let resolved_at = now();

        let record_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE sync_conflicts SET
                status = ?3,
                resolution_strategy = ?4,
                resolved_data = ?5,
                resolved_by = ?6,
                resolved_at = ?7
            WHERE id = ?1 AND table_name = ?2 AND status = ?8
            RETURNING record_id
            "#,
        )
        .bind(id)
        .bind(table)
        .bind(ConflictStatus::Resolved)
        .bind(resolution.strategy)
        .bind(serde_json::to_string(resolution.resolved_data)?)
        .bind(resolution.resolved_by)
        .bind(db_timestamp(&resolved_at))
        .bind(ConflictStatus::Unresolved)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record_id) = record_id else {
            let existing = Self::get_with_tx(&mut tx, id).await?;
            tx.rollback().await?;
            return match existing {
                Some(conflict) if conflict.table_name == table => Ok(ResolveOutcome::AlreadyResolved),
                _ => Err(DbError::not_found("SyncConflict", id)),
            };
        };

        if resolution.resolved_data.is_null() {
            RecordRepository::delete_with_tx(&mut tx, table, &record_id).await?;
        } else {
            let record =
                SyncRecord::from_payload(&record_id, resolution.resolved_data.clone(), None);
            RecordRepository::upsert_with_tx(&mut tx, table, &record, resolved_at).await?;
        }

        let resolved = Self::get_with_tx(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("SyncConflict", id))?;

        tx.commit().await?;

        info!(
            conflict_id = %id,
            table,
            record_id = %record_id,
            strategy = resolution.strategy,
            resolved_by = resolution.resolved_by,
            "Conflict resolved"
        );
        Ok(ResolveOutcome::Resolved(resolved))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
