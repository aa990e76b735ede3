//! # Sync Session Repository
//!
//! ## Session Lifecycle
//! ```text
//!            create                complete (once)
//!   ─────────────────► active ─────────────────────► completed
//!                        │
//!                        │ fail / stale sweep
//!                        ▼
//!                      failed
//! ```
//!
//! Every transition is a guarded `UPDATE ... WHERE status = 'active'`, so
//! two racing completions cannot both succeed.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::devices::DeviceRepository;
use crate::repository::{db_timestamp, opt_timestamp};
use binaa_core::{SessionStats, SessionStatus, SyncSession};

const SESSION_COLUMNS: &str = "id, device_id, user_id, session_type, status, started_at, ended_at, \
     total_operations, successful_operations, failed_operations, conflict_operations, failure_reason";

/// Repository for sync session operations.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Creates a new SessionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SessionRepository { pool }
    }

    /// Inserts a new session.
    pub async fn insert(&self, session: &SyncSession) -> DbResult<()> {
        debug!(session_id = %session.id, device_id = %session.device_id, "Inserting sync session");

        sqlx::query(
            r#"
            INSERT INTO sync_sessions (
                id, device_id, user_id, session_type, status, started_at, ended_at,
                total_operations, successful_operations, failed_operations,
                conflict_operations, failure_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&session.id)
        .bind(&session.device_id)
        .bind(&session.user_id)
        .bind(session.session_type)
        .bind(session.status)
        .bind(db_timestamp(&session.started_at))
        .bind(opt_timestamp(session.ended_at.as_ref()))
        .bind(session.total_operations)
        .bind(session.successful_operations)
        .bind(session.failed_operations)
        .bind(session.conflict_operations)
        .bind(&session.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a session by ID.
    pub async fn get(&self, id: &str) -> DbResult<Option<SyncSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sync_sessions WHERE id = ?1");
        let session = sqlx::query_as::<_, SyncSession>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    /// Completes an active session and stamps the device's last sync.
    ///
    /// The four counters, the status flip and the device update commit
    /// together. Returns false when the session is not active.
    pub async fn complete(
        &self,
        id: &str,
        ended_at: DateTime<Utc>,
        stats: &SessionStats,
    ) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let device_id: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE sync_sessions SET
                status = ?2,
                ended_at = ?3,
                total_operations = ?4,
                successful_operations = ?5,
                failed_operations = ?6,
                conflict_operations = ?7
            WHERE id = ?1 AND status = ?8
            RETURNING device_id
            "#,
        )
        .bind(id)
        .bind(SessionStatus::Completed)
        .bind(db_timestamp(&ended_at))
        .bind(stats.total_operations)
        .bind(stats.successful_operations)
        .bind(stats.failed_operations)
        .bind(stats.conflict_operations)
        .bind(SessionStatus::Active)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(device_id) = device_id else {
            tx.rollback().await?;
            return Ok(false);
        };

        DeviceRepository::touch_last_sync_with_tx(&mut tx, &device_id, ended_at).await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Fails an active session. Returns false when it is not active.
    pub async fn fail(&self, id: &str, reason: &str, ended_at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_sessions SET status = ?2, ended_at = ?3, failure_reason = ?4
            WHERE id = ?1 AND status = ?5
            "#,
        )
        .bind(id)
        .bind(SessionStatus::Failed)
        .bind(db_timestamp(&ended_at))
        .bind(reason)
        .bind(SessionStatus::Active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fails every session still active that started before `started_before`.
    ///
    /// Returns the ids of the sessions it failed.
    pub async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
        ended_at: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE sync_sessions SET status = ?1, ended_at = ?2, failure_reason = ?3
            WHERE status = ?4 AND started_at < ?5
            RETURNING id
            "#,
        )
        .bind(SessionStatus::Failed)
        .bind(db_timestamp(&ended_at))
        .bind(reason)
        .bind(SessionStatus::Active)
        .bind(db_timestamp(&started_before))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{now, Database, DbConfig};
    use binaa_core::{Device, SessionStats, SessionStatus, SessionType, SyncSession};
    use chrono::Duration;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let at = now();
        db.devices()
            .insert(&Device {
                id: "tab-001".into(),
                user_id: "u-1".into(),
                platform: "android".into(),
                os_version: None,
                app_version: None,
                model: None,
                is_active: true,
                last_sync_at: None,
                registered_at: at,
                updated_at: at,
            })
            .await
            .unwrap();
        db
    }

    fn session(id: &str, started_at: chrono::DateTime<chrono::Utc>) -> SyncSession {
        SyncSession {
            id: id.into(),
            device_id: "tab-001".into(),
            user_id: "u-1".into(),
            session_type: SessionType::Incremental,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            conflict_operations: 0,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn test_complete_once() {
        let db = setup().await;
        let repo = db.sessions();
        repo.insert(&session("s-1", now())).await.unwrap();

        let stats = SessionStats {
            total_operations: 3,
            successful_operations: 1,
            failed_operations: 1,
            conflict_operations: 1,
        };
        let ended = now();
        assert!(repo.complete("s-1", ended, &stats).await.unwrap());
        assert!(!repo.complete("s-1", now(), &SessionStats::default()).await.unwrap());

        let loaded = repo.get("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.total_operations, 3);
        assert_eq!(loaded.conflict_operations, 1);
        assert_eq!(loaded.ended_at, Some(ended));

        let device = db.devices().get("tab-001").await.unwrap().unwrap();
        assert_eq!(device.last_sync_at, Some(ended));
    }

    #[tokio::test]
    async fn test_fail_stale_only_touches_old_active_sessions() {
        let db = setup().await;
        let repo = db.sessions();
        let at = now();

        repo.insert(&session("old", at - Duration::hours(2))).await.unwrap();
        repo.insert(&session("fresh", at - Duration::minutes(5))).await.unwrap();
        repo.insert(&session("done", at - Duration::hours(3))).await.unwrap();
        repo.complete("done", at, &SessionStats::default()).await.unwrap();

        let failed = repo
            .fail_stale(at - Duration::hours(1), "timed out", at)
            .await
            .unwrap();
        assert_eq!(failed, vec!["old".to_string()]);

        let old = repo.get("old").await.unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Failed);
        assert_eq!(old.failure_reason.as_deref(), Some("timed out"));
        assert_eq!(
            repo.get("fresh").await.unwrap().unwrap().status,
            SessionStatus::Active
        );
        assert!(!repo.fail("done", "late", at).await.unwrap());
    }
}
