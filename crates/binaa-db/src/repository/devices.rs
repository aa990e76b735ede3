//! # Device Repository
//!
//! Persistence for registered field devices. Devices are never deleted.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::{db_timestamp, opt_timestamp};
use binaa_core::{Device, DeviceRegistration};

const DEVICE_COLUMNS: &str = "id, user_id, platform, os_version, app_version, model, \
     is_active, last_sync_at, registered_at, updated_at";

/// Repository for device operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Gets a device by its install identifier.
    pub async fn get(&self, id: &str) -> DbResult<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1");
        let device = sqlx::query_as::<_, Device>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    /// Lists a user's devices, most recently registered first.
    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<Device>> {
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE user_id = ?1 ORDER BY registered_at DESC"
        );
        let devices = sqlx::query_as::<_, Device>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(devices)
    }

    /// Inserts a newly registered device.
    pub async fn insert(&self, device: &Device) -> DbResult<()> {
        debug!(device_id = %device.id, user_id = %device.user_id, "Inserting device");

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, user_id, platform, os_version, app_version, model,
                is_active, last_sync_at, registered_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&device.id)
        .bind(&device.user_id)
        .bind(&device.platform)
        .bind(&device.os_version)
        .bind(&device.app_version)
        .bind(&device.model)
        .bind(device.is_active)
        .bind(opt_timestamp(device.last_sync_at.as_ref()))
        .bind(db_timestamp(&device.registered_at))
        .bind(db_timestamp(&device.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refreshes platform metadata of an existing device.
    pub async fn refresh_metadata(
        &self,
        registration: &DeviceRegistration,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                platform = ?2,
                os_version = ?3,
                app_version = ?4,
                model = ?5,
                updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&registration.device_id)
        .bind(&registration.platform)
        .bind(&registration.os_version)
        .bind(&registration.app_version)
        .bind(&registration.model)
        .bind(db_timestamp(&at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Sets the active flag. Returns false when the device doesn't exist.
    pub async fn set_active(&self, id: &str, active: bool, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE devices SET is_active = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .bind(db_timestamp(&at))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Records a completed sync.
    pub async fn touch_last_sync(&self, id: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::touch_last_sync_with_tx(&mut conn, id, at).await
    }

    pub async fn touch_last_sync_with_tx(
        tx: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query("UPDATE devices SET last_sync_at = ?2, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(db_timestamp(&at))
            .execute(&mut *tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{now, Database, DbConfig};
    use binaa_core::{Device, DeviceRegistration};

    fn device(id: &str, user: &str) -> Device {
        let at = now();
        Device {
            id: id.to_string(),
            user_id: user.to_string(),
            platform: "android".to_string(),
            os_version: Some("14".to_string()),
            app_version: Some("2.3.0".to_string()),
            model: None,
            is_active: true,
            last_sync_at: None,
            registered_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.devices();

        let original = device("tab-001", "u-1");
        repo.insert(&original).await.unwrap();

        let loaded = repo.get("tab-001").await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_device_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.devices();

        repo.insert(&device("tab-001", "u-1")).await.unwrap();
        let err = repo.insert(&device("tab-001", "u-2")).await.unwrap_err();
        assert!(matches!(err, crate::DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_refresh_and_deactivate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.devices();
        repo.insert(&device("tab-001", "u-1")).await.unwrap();

        let registration = DeviceRegistration {
            device_id: "tab-001".to_string(),
            platform: "android".to_string(),
            os_version: Some("15".to_string()),
            app_version: Some("2.4.0".to_string()),
            model: Some("SM-T505".to_string()),
        };
        assert!(repo.refresh_metadata(&registration, now()).await.unwrap());
        assert!(repo.set_active("tab-001", false, now()).await.unwrap());

        let loaded = repo.get("tab-001").await.unwrap().unwrap();
        assert_eq!(loaded.os_version.as_deref(), Some("15"));
        assert_eq!(loaded.model.as_deref(), Some("SM-T505"));
        assert!(!loaded.is_active);

        assert!(!repo.set_active("ghost", false, now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_last_sync() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.devices();
        repo.insert(&device("tab-001", "u-1")).await.unwrap();

        let at = now();
        repo.touch_last_sync("tab-001", at).await.unwrap();
        let loaded = repo.get("tab-001").await.unwrap().unwrap();
        assert_eq!(loaded.last_sync_at, Some(at));

        assert_eq!(repo.list_for_user("u-1").await.unwrap().len(), 1);
        assert!(repo.list_for_user("u-2").await.unwrap().is_empty());
    }
}
