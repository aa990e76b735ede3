//! # Offline Operation Repository
//!
//! The durable log of device mutations. Rows are kept as an audit trail;
//! only [`OperationRepository::purge_synced`] removes them, and only on
//! explicit request.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::{db_timestamp, decode_json, encode_json, opt_timestamp};
use binaa_core::{OfflineOperation, OperationKind, OperationStatus};

const OPERATION_COLUMNS: &str = "id, device_id, session_id, user_id, table_name, record_id, kind, \
     local_timestamp, server_timestamp, base_version, before_data, after_data, status, \
     retry_count, last_error, created_at";

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: String,
    device_id: String,
    session_id: String,
    user_id: String,
    table_name: String,
    record_id: String,
    kind: OperationKind,
    local_timestamp: DateTime<Utc>,
    server_timestamp: Option<DateTime<Utc>>,
    base_version: Option<i64>,
    before_data: Option<String>,
    after_data: Option<String>,
    status: OperationStatus,
    retry_count: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OperationRow> for OfflineOperation {
    type Error = DbError;

    fn try_from(row: OperationRow) -> DbResult<Self> {
        Ok(OfflineOperation {
            id: row.id,
            device_id: row.device_id,
            session_id: row.session_id,
            user_id: row.user_id,
            table_name: row.table_name,
            record_id: row.record_id,
            kind: row.kind,
            local_timestamp: row.local_timestamp,
            server_timestamp: row.server_timestamp,
            base_version: row.base_version,
            before_data: decode_json(row.before_data)?,
            after_data: decode_json(row.after_data)?,
            status: row.status,
            retry_count: row.retry_count,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

/// Terminal state written after an operation has been processed.
#[derive(Debug, Clone)]
pub struct OperationUpdate<'a> {
    pub session_id: &'a str,
    pub status: OperationStatus,
    pub retry_count: i64,
    pub last_error: Option<&'a str>,
    pub server_timestamp: DateTime<Utc>,
}

/// Repository for offline operation log operations.
#[derive(Debug, Clone)]
pub struct OperationRepository {
    pool: SqlitePool,
}

impl OperationRepository {
    /// Creates a new OperationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationRepository { pool }
    }

    /// Gets an operation by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<OfflineOperation>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with_tx(&mut conn, id).await
    }

    /// Gets an operation by ID on an existing connection or transaction.
    pub async fn get_with_tx(
        tx: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<OfflineOperation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM offline_operations WHERE id = ?1");
        let row = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(OfflineOperation::try_from).transpose()
    }

    /// Lists the operations submitted in a session, oldest first.
    pub async fn list_for_session(&self, session_id: &str) -> DbResult<Vec<OfflineOperation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM offline_operations \
             WHERE session_id = ?1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, OperationRow>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OfflineOperation::try_from).collect()
    }

    /// Inserts a freshly received operation.
    pub async fn insert_with_tx(tx: &mut SqliteConnection, op: &OfflineOperation) -> DbResult<()> {
        debug!(
            operation_id = %op.id,
            table = %op.table_name,
            record_id = %op.record_id,
            kind = op.kind.as_str(),
            "Logging offline operation"
        );

        sqlx::query(
            r#"
            INSERT INTO offline_operations (
                id, device_id, session_id, user_id, table_name, record_id, kind,
                local_timestamp, server_timestamp, base_version, before_data, after_data,
                status, retry_count, last_error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&op.id)
        .bind(&op.device_id)
        .bind(&op.session_id)
        .bind(&op.user_id)
        .bind(&op.table_name)
        .bind(&op.record_id)
        .bind(op.kind)
        .bind(db_timestamp(&op.local_timestamp))
        .bind(opt_timestamp(op.server_timestamp.as_ref()))
        .bind(op.base_version)
        .bind(encode_json(op.before_data.as_ref())?)
        .bind(encode_json(op.after_data.as_ref())?)
        .bind(op.status)
        .bind(op.retry_count)
        .bind(&op.last_error)
        .bind(db_timestamp(&op.created_at))
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    /// Writes the processing result of an operation.
    pub async fn finish_with_tx(
        tx: &mut SqliteConnection,
        id: &str,
        update: &OperationUpdate<'_>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE offline_operations SET
                session_id = ?2,
                status = ?3,
                retry_count = ?4,
                last_error = ?5,
                server_timestamp = ?6
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(update.session_id)
        .bind(update.status)
        .bind(update.retry_count)
        .bind(update.last_error)
        .bind(db_timestamp(&update.server_timestamp))
        .execute(&mut *tx)
        .await?;

        Ok(())
    }

    /// Records a processing result outside of a transaction.
    ///
    /// Used after a failed transaction was rolled back, when the operation
    /// row may or may not exist yet.
    pub async fn record_failure(&self, op: &OfflineOperation) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        let update = OperationUpdate {
            session_id: &op.session_id,
            status: op.status,
            retry_count: op.retry_count,
            last_error: op.last_error.as_deref(),
            server_timestamp: op.server_timestamp.unwrap_or(op.created_at),
        };

        if Self::get_with_tx(&mut conn, &op.id).await?.is_some() {
            Self::finish_with_tx(&mut conn, &op.id, &update).await
        } else {
            Self::insert_with_tx(&mut conn, op).await
        }
    }

    /// Deletes synced operations created before `before`.
    ///
    /// Conflicted, errored and dead-lettered operations are never purged.
    pub async fn purge_synced(&self, before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM offline_operations
            WHERE status = ?1 AND created_at < ?2
              AND id NOT IN (SELECT operation_id FROM sync_conflicts)
            "#,
        )
        .bind(OperationStatus::Synced)
        .bind(db_timestamp(&before))
        .execute(&self.pool)
        .await?;

        info!(purged = result.rows_affected(), "Purged synced operations");
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
