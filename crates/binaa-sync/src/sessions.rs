//! # Sync Sessions
//!
//! Lifecycle of one sync round of one device.
//!
//! ```text
//!   create_session ──► active ──complete_sync_session──► completed
//!                        │
//!                        ├──fail_session──────────────► failed
//!                        └──SessionSweeper (timeout)──► failed
//! ```
//!
//! Completion writes the four counters in one statement and stamps the
//! device's last sync in the same transaction. A session that is no longer
//! active cannot be completed again.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use binaa_core::access::Identity;
use binaa_core::validation::{validate_label, validate_session_stats};
use binaa_core::{
    SessionStats, SessionStatus, SessionType, SyncSession, ValidationError,
};
use binaa_db::Database;

use crate::config::SyncSettings;
use crate::devices::DeviceRegistry;
use crate::error::{SyncError, SyncResult};

/// Failure reason recorded by the sweeper.
pub const STALE_SESSION_REASON: &str = "session timed out";

#[derive(Debug, Clone)]
pub struct SyncSessionManager {
    db: Database,
    devices: DeviceRegistry,
    session_timeout: Duration,
}

impl SyncSessionManager {
    pub fn new(db: Database, devices: DeviceRegistry, settings: &SyncSettings) -> Self {
        SyncSessionManager {
            db,
            devices,
            session_timeout: settings.session_timeout(),
        }
    }

    /// Opens a session for an active device owned by `user`.
    pub async fn create_session(
        &self,
        user: &Identity,
        device_id: &str,
        session_type: SessionType,
    ) -> SyncResult<SyncSession> {
        let device = self.devices.ensure_active(device_id).await?;
        if device.user_id != user.id {
            return Err(SyncError::Forbidden(format!(
                "device {} belongs to another user",
                device.id
            )));
        }

        let session = SyncSession {
            id: Uuid::new_v4().to_string(),
            device_id: device.id,
            user_id: user.id.clone(),
            session_type,
            status: SessionStatus::Active,
            started_at: binaa_db::now(),
            ended_at: None,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            conflict_operations: 0,
            failure_reason: None,
        };
        self.db.sessions().insert(&session).await?;

        info!(
            session_id = %session.id,
            device_id = %session.device_id,
            user_id = %session.user_id,
            session_type = ?session.session_type,
            "Sync session opened"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> SyncResult<SyncSession> {
        self.db
            .sessions()
            .get(session_id)
            .await?
            .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))
    }

    /// A session owned by `user` that is still active.
    pub async fn active_session_for(&self, session_id: &str, user: &Identity) -> SyncResult<SyncSession> {
        let session = self.get_session(session_id).await?;
        if session.user_id != user.id {
            return Err(SyncError::Forbidden(format!(
                "session {} belongs to another user",
                session.id
            )));
        }
        if session.status != SessionStatus::Active {
            return Err(SyncError::SessionNotActive {
                id: session.id,
                status: session.status,
            });
        }
        Ok(session)
    }

    /// Completes an active session with its aggregate counters.
    ///
    /// `end_time` defaults to now and may not precede the session start.
    pub async fn complete_sync_session(
        &self,
        user: &Identity,
        session_id: &str,
        end_time: Option<DateTime<Utc>>,
        stats: &SessionStats,
    ) -> SyncResult<SyncSession> {
        validate_session_stats(stats)?;
        let session = self.active_session_for(session_id, user).await?;

        let end_time = end_time.unwrap_or_else(binaa_db::now);
        if end_time < session.started_at {
            return Err(ValidationError::invalid_format(
                "end_time",
                "must not be before the session started",
            )
            .into());
        }

        if !self.db.sessions().complete(session_id, end_time, stats).await? {
            // lost a race with another completion or the sweeper
            let current = self.get_session(session_id).await?;
            return Err(SyncError::SessionNotActive {
                id: current.id,
                status: current.status,
            });
        }

        info!(
            session_id,
            device_id = %session.device_id,
            total = stats.total_operations,
            success = stats.successful_operations,
            failed = stats.failed_operations,
            conflicts = stats.conflict_operations,
            "Sync session completed"
        );
        self.get_session(session_id).await
    }

    /// Fails an active session with a reason.
    pub async fn fail_session(&self, session_id: &str, reason: &str) -> SyncResult<SyncSession> {
        validate_label("reason", reason)?;
        if !self.db.sessions().fail(session_id, reason, binaa_db::now()).await? {
            let current = self.get_session(session_id).await?;
            return Err(SyncError::SessionNotActive {
                id: current.id,
                status: current.status,
            });
        }

        warn!(session_id, reason, "Sync session failed");
        self.get_session(session_id).await
    }

    /// Fails every session active for longer than the timeout.
    pub async fn sweep_stale_sessions(&self) -> SyncResult<Vec<String>> {
        let now = binaa_db::now();
        let timeout = chrono::Duration::from_std(self.session_timeout)
            .map_err(|e| SyncError::InvalidConfig(format!("session timeout: {e}")))?;

        let failed = self
            .db
            .sessions()
            .fail_stale(now - timeout, STALE_SESSION_REASON, now)
            .await?;

        if failed.is_empty() {
            debug!("No stale sessions");
        } else {
            warn!(count = failed.len(), sessions = ?failed, "Failed stale sessions");
        }
        Ok(failed)
    }
}

// =============================================================================
// Stale Session Sweeper
// =============================================================================

/// Background task failing stale sessions on an interval.
pub struct SessionSweeper {
    sessions: SyncSessionManager,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the sweeper.
#[derive(Clone)]
pub struct SessionSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SessionSweeperHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("Sweeper shutdown channel closed".into()))
    }
}

impl SessionSweeper {
    pub fn new(sessions: SyncSessionManager, interval: Duration) -> (Self, SessionSweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            SessionSweeper {
                sessions,
                interval,
                shutdown_rx,
            },
            SessionSweeperHandle { shutdown_tx },
        )
    }

    /// Runs the sweep loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Session sweeper starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sessions.sweep_stale_sessions().await {
                        error!(error = %e, "Stale session sweep failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Session sweeper shutting down");
                    break;
                }
            }
        }

        info!("Session sweeper stopped");
    }
}
