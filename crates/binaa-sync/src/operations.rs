//! # Offline Operation Log
//!
//! Applies batches of queued device mutations to the central store.
//!
//! ## Per-Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for op in batch (submission order, each in its own transaction):      │
//! │                                                                         │
//! │  0. BEGIN IMMEDIATE, then read the clock for every timestamp written.  │
//! │                                                                         │
//! │  1. Log:   seen before?                                                │
//! │            ├── synced       ──► success (replay, nothing applied)      │
//! │            ├── dead_letter  ──► error   (nothing applied)              │
//! │            ├── retry_count >= max ──► dead_letter, error               │
//! │            ├── conflicted/error   ──► retry_count += 1, re-apply       │
//! │            └── new          ──► INSERT pending                         │
//! │                                                                         │
//! │  2. Apply: validation ─► access (stored + new state) ─► version check  │
//! │            create : INSERT                    (exists  ⇒ error)        │
//! │            update : UPDATE … WHERE version=?  (missing ⇒ conflict,     │
//! │                                                stale   ⇒ conflict,     │
//! │                                                0 rows  ⇒ conflict)     │
//! │            delete : DELETE … WHERE version=?  (missing ⇒ error,        │
//! │                                                stale   ⇒ conflict)     │
//! │                                                                         │
//! │  3. Conflict: refresh the op's open conflict, else raise a new one.    │
//! │  4. Finish: status, retry_count, last_error; COMMIT                    │
//! │     Storage failure: ROLLBACK, then record the op as error.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One failing operation never affects the others:
//! `success + conflicts + errors == operations.len()`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use binaa_core::access::{AccessAction, Identity};
use binaa_core::validation::{validate_batch_size, validate_queued_operation, validate_uuid};
use binaa_core::{
    BulkApplyResult, ConflictStatus, ConflictType, GeographicScope, OfflineOperation,
    OperationKind, OperationOutcome, OperationStatus, QueuedOperation, SyncConflict, SyncRecord,
    SyncSession, SyncTable, TableRegistry, ValidationError,
};
use binaa_db::repository::operations::OperationUpdate;
use binaa_db::{
    ConflictRepository, Database, DbError, DbTransaction, OperationRepository, RecordRepository,
};

use crate::access::AccessFilter;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};

/// Result of applying one mutation inside its transaction.
#[derive(Debug)]
enum Mutation {
    Applied,
    Conflict {
        conflict_type: ConflictType,
        server_data: Option<Value>,
    },
    Rejected(String),
}

/// Durable queue of device mutations.
#[derive(Debug, Clone)]
pub struct OfflineOperationLog {
    db: Database,
    registry: Arc<TableRegistry>,
    filter: AccessFilter,
    max_retries: i64,
}

impl OfflineOperationLog {
    pub fn new(
        db: Database,
        registry: Arc<TableRegistry>,
        filter: AccessFilter,
        settings: &SyncSettings,
    ) -> Self {
        OfflineOperationLog {
            db,
            registry,
            filter,
            max_retries: settings.max_operation_retries,
        }
    }

    /// Applies `operations` against `table` for the session's device.
    ///
    /// The caller has already checked the session is active and belongs to
    /// `user`, and that the device is active. Request-level problems
    /// (unknown table, oversized batch) are errors; everything else is
    /// reported per operation.
    pub async fn apply_bulk_changes(
        &self,
        session: &SyncSession,
        user: &Identity,
        table: &str,
        operations: Vec<QueuedOperation>,
    ) -> SyncResult<BulkApplyResult> {
        validate_batch_size(operations.len())?;
        let sync_table = self
            .registry
            .get(table)
            .ok_or_else(|| SyncError::UnknownTable(table.to_string()))?;

        // Computed before any transaction: the scope query needs its own
        // connection.
        let scope = self.filter.scope_for(sync_table.as_ref(), user).await;

        let mut result = BulkApplyResult::default();
        for queued in operations {
            let outcome = self
                .apply_one(session, user, sync_table.as_ref(), scope.as_ref(), queued)
                .await;
            result.record(outcome);
        }

        info!(
            session_id = %session.id,
            device_id = %session.device_id,
            table,
            success = result.success,
            conflicts = result.conflicts,
            errors = result.errors,
            "Applied operation batch"
        );
        Ok(result)
    }

    /// Deletes synced operations older than `older_than_days`. Conflicted,
    /// failed and dead-lettered operations are kept.
    pub async fn purge_synced_operations(&self, older_than_days: u32) -> SyncResult<u64> {
        let before = binaa_db::now() - Duration::days(i64::from(older_than_days));
        Ok(self.db.operations().purge_synced(before).await?)
    }

    async fn apply_one(
        &self,
        session: &SyncSession,
        user: &Identity,
        table: &dyn SyncTable,
        scope: Option<&GeographicScope>,
        queued: QueuedOperation,
    ) -> OperationOutcome {
        if let Err(e) = validate_uuid("id", &queued.id) {
            return outcome(&queued.id, OperationStatus::Error, None, Some(e.to_string()));
        }

        let validation = validate_queued_operation(&queued)
            .and_then(|_| table.check_operation(queued.kind))
            .and_then(|_| match (&queued.kind, &queued.after_data) {
                (OperationKind::Delete, _) => Ok(()),
                (_, Some(after)) => table.validate_payload(after),
                (_, None) => Err(ValidationError::required("after_data")),
            });

        let received = binaa_db::now();
        let mut op = OfflineOperation {
            id: queued.id,
            device_id: session.device_id.clone(),
            session_id: session.id.clone(),
            user_id: user.id.clone(),
            table_name: table.name().to_string(),
            record_id: queued.record_id,
            kind: queued.kind,
            local_timestamp: queued.local_timestamp,
            server_timestamp: Some(received),
            base_version: queued.base_version,
            before_data: queued.before_data,
            after_data: queued.after_data,
            status: OperationStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: received,
        };

        match self.process(&mut op, user, table, scope, validation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    operation_id = %op.id,
                    table = table.name(),
                    record_id = %op.record_id,
                    error = %e,
                    "Operation failed, rolled back"
                );
                op.status = OperationStatus::Error;
                op.last_error = Some(e.to_string());
                if let Err(log_err) = self.db.operations().record_failure(&op).await {
                    error!(operation_id = %op.id, error = %log_err, "Failed to record operation failure");
                }
                outcome(&op.id, OperationStatus::Error, None, op.last_error.clone())
            }
        }
    }

    /// Logs, applies and finishes one operation in a single transaction.
    async fn process(
        &self,
        op: &mut OfflineOperation,
        user: &Identity,
        table: &dyn SyncTable,
        scope: Option<&GeographicScope>,
        validation: Result<(), ValidationError>,
    ) -> SyncResult<OperationOutcome> {
        let mut tx = self.db.begin_write().await?;
        let now = binaa_db::now();
        op.server_timestamp = Some(now);
        op.created_at = now;

        match OperationRepository::get_with_tx(&mut tx, &op.id).await? {
            None => OperationRepository::insert_with_tx(&mut tx, op).await?,
            Some(prev)
                if prev.device_id != op.device_id
                    || prev.table_name != op.table_name
                    || prev.record_id != op.record_id =>
            {
                tx.rollback().await.map_err(DbError::from)?;
                warn!(operation_id = %op.id, device_id = %op.device_id, "Operation id reused for a different target");
                return Ok(outcome(
                    &op.id,
                    OperationStatus::Error,
                    None,
                    Some("operation id already used for another record".to_string()),
                ));
            }
            Some(prev) if prev.status == OperationStatus::Synced => {
                tx.rollback().await.map_err(DbError::from)?;
                debug!(operation_id = %op.id, "Replay of synced operation");
                return Ok(outcome(&op.id, OperationStatus::Synced, None, None));
            }
            Some(prev) if prev.status == OperationStatus::DeadLetter => {
                tx.rollback().await.map_err(DbError::from)?;
                return Ok(outcome(
                    &op.id,
                    OperationStatus::DeadLetter,
                    None,
                    prev.last_error,
                ));
            }
            Some(prev) if prev.retry_count >= self.max_retries => {
                op.retry_count = prev.retry_count;
                op.status = OperationStatus::DeadLetter;
                op.last_error = Some(format!(
                    "gave up after {} retries: {}",
                    prev.retry_count,
                    prev.last_error.as_deref().unwrap_or("unknown error")
                ));
                Self::finish(&mut tx, op, now).await?;
                tx.commit().await.map_err(DbError::from)?;

                warn!(
                    operation_id = %op.id,
                    retry_count = op.retry_count,
                    "Operation moved to dead letter"
                );
                return Ok(outcome(&op.id, op.status, None, op.last_error.clone()));
            }
            Some(prev) => {
                op.retry_count = prev.retry_count + 1;
                op.created_at = prev.created_at;
                debug!(operation_id = %op.id, retry_count = op.retry_count, "Retrying operation");
            }
        }

        let mutation = match validation {
            Ok(()) => self.apply_mutation(&mut tx, op, user, table, scope, now).await?,
            Err(e) => Mutation::Rejected(e.to_string()),
        };

        let mut conflict_id = None;
        match mutation {
            Mutation::Applied => {
                op.status = OperationStatus::Synced;
                op.last_error = None;
            }
            Mutation::Conflict {
                conflict_type,
                server_data,
            } => {
                let open =
                    ConflictRepository::find_unresolved_for_operation_with_tx(&mut tx, &op.id)
                        .await?;
                let conflict = match open {
                    Some(open) => {
                        let refreshed = SyncConflict {
                            session_id: op.session_id.clone(),
                            conflict_type,
                            client_data: op.after_data.clone(),
                            server_data,
                            ..open
                        };
                        ConflictRepository::refresh_with_tx(&mut tx, &refreshed).await?;
                        debug!(conflict_id = %refreshed.id, operation_id = %op.id, "Refreshed open conflict");
                        refreshed
                    }
                    None => {
                        let raised = SyncConflict {
                            id: Uuid::new_v4().to_string(),
                            session_id: op.session_id.clone(),
                            operation_id: op.id.clone(),
                            table_name: op.table_name.clone(),
                            record_id: op.record_id.clone(),
                            conflict_type,
                            client_data: op.after_data.clone(),
                            server_data,
                            status: ConflictStatus::Unresolved,
                            resolution_strategy: None,
                            resolved_data: None,
                            resolved_by: None,
                            resolved_at: None,
                            created_at: now,
                        };
                        ConflictRepository::insert_with_tx(&mut tx, &raised).await?;
                        raised
                    }
                };

                op.status = OperationStatus::Conflicted;
                op.last_error = Some(format!("{} conflict", conflict_type.as_str()));
                conflict_id = Some(conflict.id);
            }
            Mutation::Rejected(reason) => {
                op.status = OperationStatus::Error;
                op.last_error = Some(reason);
            }
        }

        Self::finish(&mut tx, op, now).await?;
        tx.commit().await.map_err(DbError::from)?;

        debug!(
            operation_id = %op.id,
            table = %op.table_name,
            record_id = %op.record_id,
            kind = op.kind.as_str(),
            status = op.status.as_str(),
            "Processed operation"
        );
        Ok(outcome(
            &op.id,
            op.status,
            conflict_id,
            match op.status {
                OperationStatus::Synced => None,
                _ => op.last_error.clone(),
            },
        ))
    }

    async fn finish(
        tx: &mut DbTransaction,
        op: &OfflineOperation,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let update = OperationUpdate {
            session_id: &op.session_id,
            status: op.status,
            retry_count: op.retry_count,
            last_error: op.last_error.as_deref(),
            server_timestamp: now,
        };
        OperationRepository::finish_with_tx(&mut **tx, &op.id, &update).await?;
        Ok(())
    }

    /// The write itself. Storage errors propagate; rule violations become
    /// [`Mutation::Rejected`].
    async fn apply_mutation(
        &self,
        tx: &mut DbTransaction,
        op: &OfflineOperation,
        user: &Identity,
        table: &dyn SyncTable,
        scope: Option<&GeographicScope>,
        now: DateTime<Utc>,
    ) -> SyncResult<Mutation> {
        let name = table.name();
        let existing = RecordRepository::get_with_tx(&mut **tx, name, &op.record_id).await?;

        match op.kind {
            OperationKind::Create => {
                let Some(after) = op.after_data.clone() else {
                    return Ok(Mutation::Rejected("after_data is required".into()));
                };
                let record = SyncRecord::from_payload(&op.record_id, after, Some(user.id.clone()));
                if let Err(reason) =
                    self.filter
                        .can_write(table, user, AccessAction::Create, &record, scope)
                {
                    return Ok(Mutation::Rejected(format!("access denied: {reason}")));
                }
                if existing.is_some() {
                    return Ok(Mutation::Rejected(format!(
                        "record {} already exists",
                        op.record_id
                    )));
                }

                RecordRepository::insert_with_tx(&mut **tx, name, &record, now).await?;
                Ok(Mutation::Applied)
            }

            OperationKind::Update => {
                let Some(existing) = existing else {
                    return Ok(Mutation::Conflict {
                        conflict_type: ConflictType::RecordMissing,
                        server_data: None,
                    });
                };
                let Some(after) = op.after_data.clone() else {
                    return Ok(Mutation::Rejected("after_data is required".into()));
                };
                let proposed =
                    SyncRecord::from_payload(&op.record_id, after, existing.created_by.clone());

                for record in [&existing, &proposed] {
                    if let Err(reason) =
                        self.filter
                            .can_write(table, user, AccessAction::Update, record, scope)
                    {
                        return Ok(Mutation::Rejected(format!("access denied: {reason}")));
                    }
                }

                let base_version = op.base_version.unwrap_or_default();
                if existing.version != base_version {
                    return Ok(Mutation::Conflict {
                        conflict_type: ConflictType::VersionMismatch,
                        server_data: Some(existing.data),
                    });
                }

                let written = RecordRepository::update_versioned_with_tx(
                    &mut **tx,
                    name,
                    &proposed,
                    base_version,
                    now,
                )
                .await?;
                if !written {
                    return Ok(Mutation::Conflict {
                        conflict_type: ConflictType::ConcurrentWrite,
                        server_data: Some(existing.data),
                    });
                }
                Ok(Mutation::Applied)
            }

            OperationKind::Delete => {
                let Some(existing) = existing else {
                    return Ok(Mutation::Rejected(format!(
                        "record {} not found",
                        op.record_id
                    )));
                };
                if let Err(reason) =
                    self.filter
                        .can_write(table, user, AccessAction::Delete, &existing, scope)
                {
                    return Ok(Mutation::Rejected(format!("access denied: {reason}")));
                }

                let base_version = op.base_version.unwrap_or_default();
                if existing.version != base_version {
                    return Ok(Mutation::Conflict {
                        conflict_type: ConflictType::VersionMismatch,
                        server_data: Some(existing.data),
                    });
                }

                let deleted =
                    RecordRepository::delete_versioned_with_tx(&mut **tx, name, &op.record_id, base_version)
                        .await?;
                if !deleted {
                    return Ok(Mutation::Conflict {
                        conflict_type: ConflictType::ConcurrentWrite,
                        server_data: Some(existing.data),
                    });
                }
                Ok(Mutation::Applied)
            }
        }
    }
}

fn outcome(
    operation_id: &str,
    status: OperationStatus,
    conflict_id: Option<String>,
    message: Option<String>,
) -> OperationOutcome {
    OperationOutcome {
        operation_id: operation_id.to_string(),
        status,
        conflict_id,
        message,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
