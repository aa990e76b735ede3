//! # Sync Engine
//!
//! Wires the engine components around one database handle and one table
//! registry. The HTTP layer talks to this type only.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              SyncEngine                                 │
//! │                                                                         │
//! │   pull:  changes ──► AccessFilter ──► GeographicScopeExpander           │
//! │   push:  sessions (owner, active) ──► devices (active) ──► operations   │
//! │   fix:   conflicts ──► AccessFilter                                     │
//! │                                                                         │
//! │   background: SessionSweeper (stale active sessions ──► failed)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::info;

use binaa_core::access::Identity;
use binaa_core::{BulkApplyResult, QueuedOperation, TableRegistry};
use binaa_db::Database;

use crate::access::AccessFilter;
use crate::changes::DifferentialSyncQuery;
use crate::config::SyncSettings;
use crate::conflicts::ConflictResolver;
use crate::devices::DeviceRegistry;
use crate::error::SyncResult;
use crate::operations::OfflineOperationLog;
use crate::scope::GeographicScopeExpander;
use crate::sessions::{SessionSweeper, SessionSweeperHandle, SyncSessionManager};

/// Engine facade. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    settings: SyncSettings,
    registry: Arc<TableRegistry>,
    scope: GeographicScopeExpander,
    changes: DifferentialSyncQuery,
    operations: OfflineOperationLog,
    conflicts: ConflictResolver,
    devices: DeviceRegistry,
    sessions: SyncSessionManager,
}

impl SyncEngine {
    /// Builds the engine over the standard table registry.
    pub fn new(db: Database, settings: SyncSettings) -> SyncResult<Self> {
        Self::with_registry(db, settings, TableRegistry::standard())
    }

    pub fn with_registry(
        db: Database,
        settings: SyncSettings,
        registry: TableRegistry,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let registry = Arc::new(registry);

        let scope = GeographicScopeExpander::new(db.clone());
        let filter = AccessFilter::new(scope.clone());
        let devices = DeviceRegistry::new(db.clone());

        Ok(SyncEngine {
            changes: DifferentialSyncQuery::new(
                db.clone(),
                registry.clone(),
                filter.clone(),
                &settings,
            ),
            operations: OfflineOperationLog::new(
                db.clone(),
                registry.clone(),
                filter.clone(),
                &settings,
            ),
            conflicts: ConflictResolver::new(db.clone(), registry.clone(), filter),
            sessions: SyncSessionManager::new(db, devices.clone(), &settings),
            devices,
            scope,
            registry,
            settings,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn scope(&self) -> &GeographicScopeExpander {
        &self.scope
    }

    pub fn changes(&self) -> &DifferentialSyncQuery {
        &self.changes
    }

    pub fn operations(&self) -> &OfflineOperationLog {
        &self.operations
    }

    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn sessions(&self) -> &SyncSessionManager {
        &self.sessions
    }

    /// Applies a batch pushed within a session.
    ///
    /// The session must belong to `user` and be active, and its device must
    /// still be active. Everything after that is reported per operation.
    pub async fn submit_operations(
        &self,
        user: &Identity,
        session_id: &str,
        table: &str,
        operations: Vec<QueuedOperation>,
    ) -> SyncResult<BulkApplyResult> {
        let session = self.sessions.active_session_for(session_id, user).await?;
        self.devices.ensure_active(&session.device_id).await?;
        self.operations
            .apply_bulk_changes(&session, user, table, operations)
            .await
    }

    /// Spawns the stale session sweeper unless it is disabled.
    pub fn start_sweeper(&self) -> Option<SessionSweeperHandle> {
        let interval = self.settings.sweep_interval()?;
        let (sweeper, handle) = SessionSweeper::new(self.sessions.clone(), interval);
        tokio::spawn(sweeper.run());
        info!(interval_secs = interval.as_secs(), "Session sweeper spawned");
        Some(handle)
    }
}
