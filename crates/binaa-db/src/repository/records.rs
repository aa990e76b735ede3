//! # Synchronized Record Repository
//!
//! Reads and writes rows of the synchronized tables.
//!
//! ## Identifier Safety
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Table and watermark names are `&'static str`.                          │
//! │                                                                         │
//! │  They can only come from the compiled-in table registry                 │
//! │  (SyncTable::name / Watermark::column), never from request input.      │
//! │  Every value (ids, payloads, versions, timestamps) is a bound           │
//! │  parameter.                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Optimistic Locking
//! Writes carry the version the caller read:
//! `UPDATE t SET ..., version = version + 1 WHERE id = ? AND version = ?`.
//! Zero affected rows means another writer got there first.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::db_timestamp;
use binaa_core::SyncRecord;

const RECORD_COLUMNS: &str = "id, data, version, governorate_id, district_id, sub_district_id, \
     neighborhood_id, assigned_user_id, created_by, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    id: String,
    data: String,
    version: i64,
    governorate_id: Option<String>,
    district_id: Option<String>,
    sub_district_id: Option<String>,
    neighborhood_id: Option<String>,
    assigned_user_id: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for SyncRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> DbResult<Self> {
        Ok(SyncRecord {
            id: row.id,
            data: serde_json::from_str(&row.data)?,
            version: row.version,
            governorate_id: row.governorate_id,
            district_id: row.district_id,
            sub_district_id: row.sub_district_id,
            neighborhood_id: row.neighborhood_id,
            assigned_user_id: row.assigned_user_id,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for rows of synchronized tables.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    pool: SqlitePool,
}

impl RecordRepository {
    /// Creates a new RecordRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordRepository { pool }
    }

    /// Rows after the cursor `(since, after_id)`, oldest first.
    ///
    /// Ordering is `(watermark, id)`. With `after_id` a row qualifies when
    /// its watermark is after `since`, or equal to it with a greater id, so
    /// rows sharing a watermark can straddle a page boundary. Without it
    /// the watermark alone must be after `since`. `since = None` scans from
    /// the beginning.
    pub async fn changed_since(
        &self,
        table: &'static str,
        watermark: &'static str,
        since: Option<DateTime<Utc>>,
        after_id: Option<&str>,
        limit: u32,
    ) -> DbResult<Vec<SyncRecord>> {
        let rows = match (since, after_id) {
            (Some(since), Some(after_id)) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM {table} \
                     WHERE {watermark} > ?1 OR ({watermark} = ?1 AND id > ?2) \
                     ORDER BY {watermark} ASC, id ASC LIMIT ?3"
                );
                sqlx::query_as::<_, RecordRow>(&sql)
                    .bind(db_timestamp(&since))
                    .bind(after_id)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
            (Some(since), None) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM {table} WHERE {watermark} > ?1 \
                     ORDER BY {watermark} ASC, id ASC LIMIT ?2"
                );
                sqlx::query_as::<_, RecordRow>(&sql)
                    .bind(db_timestamp(&since))
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, _) => {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM {table} \
                     ORDER BY {watermark} ASC, id ASC LIMIT ?1"
                );
                sqlx::query_as::<_, RecordRow>(&sql)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        debug!(table, rows = rows.len(), "Scanned changed rows");
        rows.into_iter().map(SyncRecord::try_from).collect()
    }

    /// Gets a row by id.
    pub async fn get(&self, table: &'static str, id: &str) -> DbResult<Option<SyncRecord>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_with_tx(&mut conn, table, id).await
    }

    pub async fn get_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        id: &str,
    ) -> DbResult<Option<SyncRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM {table} WHERE id = ?1");
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        row.map(SyncRecord::try_from).transpose()
    }

    /// Inserts a new row at version 1 with server timestamps.
    pub async fn insert_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        record: &SyncRecord,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = format!(
            "INSERT INTO {table} ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(serde_json::to_string(&record.data)?)
            .bind(&record.governorate_id)
            .bind(&record.district_id)
            .bind(&record.sub_district_id)
            .bind(&record.neighborhood_id)
            .bind(&record.assigned_user_id)
            .bind(&record.created_by)
            .bind(db_timestamp(&at))
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    /// Replaces a row's payload if it is still at `expected_version`.
    ///
    /// Returns false when the row changed (or vanished) since it was read.
    pub async fn update_versioned_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        record: &SyncRecord,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let sql = format!(
            "UPDATE {table} SET \
                data = ?3, governorate_id = ?4, district_id = ?5, sub_district_id = ?6, \
                neighborhood_id = ?7, assigned_user_id = ?8, \
                version = version + 1, updated_at = ?9 \
             WHERE id = ?1 AND version = ?2"
        );
        let result = sqlx::query(&sql)
            .bind(&record.id)
            .bind(expected_version)
            .bind(serde_json::to_string(&record.data)?)
            .bind(&record.governorate_id)
            .bind(&record.district_id)
            .bind(&record.sub_district_id)
            .bind(&record.neighborhood_id)
            .bind(&record.assigned_user_id)
            .bind(db_timestamp(&at))
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes a row if it is still at `expected_version`.
    pub async fn delete_versioned_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        id: &str,
        expected_version: i64,
    ) -> DbResult<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = ?1 AND version = ?2");
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Writes a row unconditionally: inserts at version 1 or bumps the
    /// version of the existing row.
    pub async fn upsert_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        record: &SyncRecord,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = format!(
            "INSERT INTO {table} ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
             ON CONFLICT(id) DO UPDATE SET \
                data = excluded.data, \
                governorate_id = excluded.governorate_id, \
                district_id = excluded.district_id, \
                sub_district_id = excluded.sub_district_id, \
                neighborhood_id = excluded.neighborhood_id, \
                assigned_user_id = excluded.assigned_user_id, \
                version = {table}.version + 1, \
                updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(serde_json::to_string(&record.data)?)
            .bind(&record.governorate_id)
            .bind(&record.district_id)
            .bind(&record.sub_district_id)
            .bind(&record.neighborhood_id)
            .bind(&record.assigned_user_id)
            .bind(&record.created_by)
            .bind(db_timestamp(&at))
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    /// Deletes a row regardless of version.
    pub async fn delete_with_tx(
        tx: &mut SqliteConnection,
        table: &'static str,
        id: &str,
    ) -> DbResult<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = ?1");
        let result = sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Writes a row outside a transaction. Seeding and tests.
    pub async fn upsert(
        &self,
        table: &'static str,
        record: &SyncRecord,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::upsert_with_tx(&mut conn, table, record, at).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{now, Database, DbConfig};
    use chrono::Duration;
    use serde_json::json;

    fn visit(id: &str, neighborhood: &str) -> SyncRecord {
        SyncRecord::from_payload(
            id,
            json!({ "neighborhood_id": neighborhood, "notes": "initial" }),
            Some("u-1".to_string()),
        )
    }

    #[tokio::test]
    async fn test_changed_since_is_strict_and_ordered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.records();
        let t0 = now();

        repo.upsert("field_visits", &visit("v-2", "nb-1"), t0 + Duration::seconds(2))
            .await
            .unwrap();
        repo.upsert("field_visits", &visit("v-1", "nb-1"), t0 + Duration::seconds(1))
            .await
            .unwrap();
        repo.upsert("field_visits", &visit("v-0", "nb-1"), t0).await.unwrap();

        let all = repo
            .changed_since("field_visits", "updated_at", None, None, 10)
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v-0", "v-1", "v-2"]);

        let after = repo
            .changed_since("field_visits", "updated_at", Some(t0), None, 10)
            .await
            .unwrap();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|r| r.updated_at > t0));

        let page = repo
            .changed_since("field_visits", "updated_at", None, None, 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_changed_since_cursor_splits_equal_watermarks() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.records();
        let at = now();
        for id in ["v-1", "v-2", "v-3"] {
            repo.upsert("field_visits", &visit(id, "nb-1"), at).await.unwrap();
        }

        let rest = repo
            .changed_since("field_visits", "updated_at", Some(at), Some("v-2"), 10)
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["v-3"]);

        let strict = repo
            .changed_since("field_visits", "updated_at", Some(at), None, 10)
            .await
            .unwrap();
        assert!(strict.is_empty());
    }

    #[tokio::test]
    async fn test_versioned_update_and_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let at = now();
        let mut tx = db.begin().await.unwrap();

        RecordRepository::insert_with_tx(&mut tx, "field_visits", &visit("v-1", "nb-1"), at)
            .await
            .unwrap();

        let mut edited = visit("v-1", "nb-2");
        edited.data = json!({ "neighborhood_id": "nb-2", "notes": "moved" });
        assert!(
            RecordRepository::update_versioned_with_tx(&mut tx, "field_visits", &edited, 1, at)
                .await
                .unwrap()
        );
        assert!(
            !RecordRepository::update_versioned_with_tx(&mut tx, "field_visits", &edited, 1, at)
                .await
                .unwrap(),
            "stale version must not write"
        );

        let stored = RecordRepository::get_with_tx(&mut tx, "field_visits", "v-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.neighborhood_id.as_deref(), Some("nb-2"));
        assert_eq!(stored.created_by.as_deref(), Some("u-1"));

        assert!(
            !RecordRepository::delete_versioned_with_tx(&mut tx, "field_visits", "v-1", 1)
                .await
                .unwrap()
        );
        assert!(
            RecordRepository::delete_versioned_with_tx(&mut tx, "field_visits", "v-1", 2)
                .await
                .unwrap()
        );
        tx.commit().await.unwrap();

        assert!(db.records().get("field_visits", "v-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_bumps_version() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.records();

        repo.upsert("appointments", &visit("a-1", "nb-1"), now()).await.unwrap();
        repo.upsert("appointments", &visit("a-1", "nb-1"), now()).await.unwrap();

        let stored = repo.get("appointments", "a-1").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_insert_duplicate_id_is_unique_violation() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut tx = db.begin().await.unwrap();

        RecordRepository::insert_with_tx(&mut tx, "survey_points", &visit("p-1", "nb-1"), now())
            .await
            .unwrap();
        let err = RecordRepository::insert_with_tx(&mut tx, "survey_points", &visit("p-1", "nb-1"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }
}
