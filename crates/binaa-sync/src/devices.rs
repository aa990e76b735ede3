//! # Device Registry
//!
//! Device identity, activation and last-sync bookkeeping. Devices are never
//! deleted; deactivation blocks new sessions and operation pushes.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use binaa_core::access::Identity;
use binaa_core::validation::{validate_identifier, validate_label};
use binaa_core::{Device, DeviceRegistration};
use binaa_db::Database;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    db: Database,
}

impl DeviceRegistry {
    pub fn new(db: Database) -> Self {
        DeviceRegistry { db }
    }

    /// Registers a device for `user`, or refreshes its metadata when it is
    /// already registered to them.
    ///
    /// Re-registering never reactivates a deactivated device.
    pub async fn register_device(
        &self,
        user: &Identity,
        registration: &DeviceRegistration,
    ) -> SyncResult<Device> {
        validate_identifier("device_id", &registration.device_id)?;
        validate_label("platform", &registration.platform)?;
        for (field, value) in [
            ("os_version", &registration.os_version),
            ("app_version", &registration.app_version),
            ("model", &registration.model),
        ] {
            if let Some(value) = value {
                validate_label(field, value)?;
            }
        }

        let devices = self.db.devices();
        let now = binaa_db::now();

        if let Some(existing) = devices.get(&registration.device_id).await? {
            if existing.user_id != user.id {
                warn!(
                    device_id = %existing.id,
                    owner = %existing.user_id,
                    user_id = %user.id,
                    "Device registration by another user"
                );
                return Err(SyncError::DeviceOwnedByOther(existing.id));
            }
            devices.refresh_metadata(registration, now).await?;
            info!(device_id = %existing.id, user_id = %user.id, "Device metadata refreshed");
            return self.get_device(&registration.device_id).await;
        }

        let device = Device {
            id: registration.device_id.clone(),
            user_id: user.id.clone(),
            platform: registration.platform.clone(),
            os_version: registration.os_version.clone(),
            app_version: registration.app_version.clone(),
            model: registration.model.clone(),
            is_active: true,
            last_sync_at: None,
            registered_at: now,
            updated_at: now,
        };
        devices.insert(&device).await?;

        info!(
            device_id = %device.id,
            user_id = %user.id,
            platform = %device.platform,
            "Device registered"
        );
        Ok(device)
    }

    /// Deactivates a device. Supervisors only.
    pub async fn deactivate_device(&self, actor: &Identity, device_id: &str) -> SyncResult<Device> {
        if !actor.role.is_supervisor() {
            return Err(SyncError::Forbidden(
                "only administrators and managers can deactivate devices".into(),
            ));
        }

        if !self
            .db
            .devices()
            .set_active(device_id, false, binaa_db::now())
            .await?
        {
            return Err(SyncError::DeviceNotFound(device_id.to_string()));
        }

        info!(device_id, actor = %actor.id, "Device deactivated");
        self.get_device(device_id).await
    }

    /// Stamps a completed sync on the device.
    pub async fn update_device_last_sync(&self, device_id: &str, at: DateTime<Utc>) -> SyncResult<()> {
        if !self.db.devices().touch_last_sync(device_id, at).await? {
            return Err(SyncError::DeviceNotFound(device_id.to_string()));
        }
        Ok(())
    }

    pub async fn get_device(&self, device_id: &str) -> SyncResult<Device> {
        self.db
            .devices()
            .get(device_id)
            .await?
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))
    }

    /// Gate for session open and operation pushes.
    pub async fn ensure_active(&self, device_id: &str) -> SyncResult<Device> {
        let device = self.get_device(device_id).await?;
        if !device.is_active {
            warn!(device_id, "Rejected request from deactivated device");
            return Err(SyncError::DeviceInactive(device.id));
        }
        Ok(device)
    }
}
