//! # Conflict Resolution
//!
//! Conflicts raised by bulk apply wait here until someone resolves them
//! explicitly. Nothing is resolved automatically.
//!
//! ```text
//!   unresolved ──resolve(strategy, resolved_data)──► resolved   (final)
//!                       │
//!                       └── same transaction: resolved_data becomes the
//!                           record state (null deletes the record)
//! ```
//!
//! Who may resolve: the user that owns the conflict's session, or a
//! supervisor. A non-supervisor's resolved state must also pass the
//! table's write policy.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use binaa_core::access::{AccessAction, Identity};
use binaa_core::validation::validate_label;
use binaa_core::{ConflictStatus, SyncConflict, SyncRecord, SyncSession, TableRegistry, ValidationError};
use binaa_db::repository::conflicts::{Resolution, ResolveOutcome};
use binaa_db::{Database, DbError};

use crate::access::AccessFilter;
use crate::error::{SyncError, SyncResult};

/// Records and resolves sync conflicts.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    db: Database,
    registry: Arc<TableRegistry>,
    filter: AccessFilter,
}

impl ConflictResolver {
    pub fn new(db: Database, registry: Arc<TableRegistry>, filter: AccessFilter) -> Self {
        ConflictResolver {
            db,
            registry,
            filter,
        }
    }

    /// Unresolved conflicts of a session the caller may see.
    pub async fn list_unresolved(
        &self,
        session_id: &str,
        user: &Identity,
    ) -> SyncResult<Vec<SyncConflict>> {
        let session = self.session(session_id).await?;
        authorize(&session, user)?;
        Ok(self.db.conflicts().list_unresolved(session_id).await?)
    }

    /// Resolves a conflict with an opaque strategy label.
    ///
    /// `resolved_data` is committed as the new record state; JSON `null`
    /// deletes the record. A second resolution is rejected with
    /// [`SyncError::ConflictAlreadyResolved`].
    pub async fn resolve_sync_conflict(
        &self,
        conflict_id: &str,
        strategy: &str,
        resolved_data: &Value,
        resolved_by: &Identity,
    ) -> SyncResult<SyncConflict> {
        validate_label("strategy", strategy)?;
        if !(resolved_data.is_object() || resolved_data.is_null()) {
            return Err(ValidationError::invalid_format(
                "resolved_data",
                "expected a JSON object or null",
            )
            .into());
        }

        let conflict = self
            .db
            .conflicts()
            .get(conflict_id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(SyncError::ConflictAlreadyResolved(conflict_id.to_string()));
        }

        let table = self
            .registry
            .get(&conflict.table_name)
            .ok_or_else(|| SyncError::UnknownTable(conflict.table_name.clone()))?;

        let session = self.session(&conflict.session_id).await?;
        authorize(&session, resolved_by)?;

        if !resolved_data.is_null() {
            table.validate_payload(resolved_data)?;
        }

        if !resolved_by.role.is_supervisor() {
            let scope = self.filter.scope_for(table.as_ref(), resolved_by).await;
            let mut candidates = Vec::with_capacity(2);
            if let Some(current) = self.db.records().get(table.name(), &conflict.record_id).await? {
                candidates.push(current);
            }
            if !resolved_data.is_null() {
                candidates.push(SyncRecord::from_payload(
                    &conflict.record_id,
                    resolved_data.clone(),
                    None,
                ));
            }
            for record in &candidates {
                if let Err(reason) = self.filter.can_write(
                    table.as_ref(),
                    resolved_by,
                    AccessAction::Update,
                    record,
                    scope.as_ref(),
                ) {
                    return Err(SyncError::Forbidden(format!(
                        "resolution of {} denied: {reason}",
                        conflict.record_id
                    )));
                }
            }
        }

        let resolution = Resolution {
            strategy,
            resolved_data,
            resolved_by: &resolved_by.id,
        };

        match self.db.conflicts().resolve(conflict_id, table.name(), &resolution).await {
            Ok(ResolveOutcome::Resolved(resolved)) => {
                info!(
                    conflict_id,
                    session_id = %resolved.session_id,
                    strategy,
                    resolved_by = %resolved_by.id,
                    "Sync conflict resolved"
                );
                Ok(resolved)
            }
            Ok(ResolveOutcome::AlreadyResolved) => {
                warn!(conflict_id, "Conflict resolved concurrently");
                Err(SyncError::ConflictAlreadyResolved(conflict_id.to_string()))
            }
            Err(DbError::NotFound { .. }) => Err(SyncError::ConflictNotFound(conflict_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn session(&self, session_id: &str) -> SyncResult<SyncSession> {
        self.db
            .sessions()
            .get(session_id)
            .await?
            .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))
    }
}

fn authorize(session: &SyncSession, user: &Identity) -> SyncResult<()> {
    if session.user_id == user.id || user.role.is_supervisor() {
        Ok(())
    } else {
        Err(SyncError::Forbidden(format!(
            "session {} belongs to another user",
            session.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::operations::OfflineOperationLog;
    use crate::scope::GeographicScopeExpander;
    use crate::testing::{add_device, assign, located, open_session, seed_hierarchy, test_db, visit_payload};
    use binaa_core::{GeoLevel, OperationKind, QueuedOperation, UserRole};
    use serde_json::json;
    use uuid::Uuid;

    struct Fixture {
        db: Database,
        resolver: ConflictResolver,
        conflict_id: String,
        session_id: String,
        owner: Identity,
    }

    /// A version-mismatch conflict on `v-1` raised by surveyor-1.
    async fn fixture() -> Fixture {
        let db = test_db().await;
        seed_hierarchy(&db).await;
        assign(&db, "surveyor-1", GeoLevel::District, "dist-shuub").await;
        add_device(&db, "tab-001", "surveyor-1").await;
        let session = open_session(&db, "tab-001", "surveyor-1").await;
        for _ in 0..2 {
            db.records()
                .upsert("field_visits", &located("v-1", "nb-y"), binaa_db::now())
                .await
                .unwrap();
        }

        let registry = Arc::new(TableRegistry::standard());
        let filter = AccessFilter::new(GeographicScopeExpander::new(db.clone()));
        let owner = Identity::new("surveyor-1", "surveyor1", UserRole::Surveyor);

        let log = OfflineOperationLog::new(
            db.clone(),
            registry.clone(),
            filter.clone(),
            &SyncSettings::default(),
        );
        let mut client = visit_payload("nb-y");
        client["notes"] = json!("client edit");
        let result = log
            .apply_bulk_changes(
                &session,
                &owner,
                "field_visits",
                vec![QueuedOperation {
                    id: Uuid::new_v4().to_string(),
                    record_id: "v-1".into(),
                    kind: OperationKind::Update,
                    local_timestamp: binaa_db::now(),
                    base_version: Some(1),
                    before_data: None,
                    after_data: Some(client),
                }],
            )
            .await
            .unwrap();
        let conflict_id = result.outcomes[0].conflict_id.clone().unwrap();

        Fixture {
            resolver: ConflictResolver::new(db.clone(), registry, filter),
            db,
            conflict_id,
            session_id: session.id,
            owner,
        }
    }

    #[tokio::test]
    async fn test_resolve_commits_state_and_is_final() {
        let f = fixture().await;
        let mut merged = visit_payload("nb-y");
        merged["notes"] = json!("merged");

        let resolved = f
            .resolver
            .resolve_sync_conflict(&f.conflict_id, "merge", &merged, &f.owner)
            .await
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.resolution_strategy.as_deref(), Some("merge"));
        assert_eq!(resolved.resolved_by.as_deref(), Some("surveyor-1"));
        assert!(resolved.resolved_at.is_some());

        let record = f.db.records().get("field_visits", "v-1").await.unwrap().unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.data["notes"], "merged");

        let second = f
            .resolver
            .resolve_sync_conflict(&f.conflict_id, "server_wins", &json!(null), &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(second, SyncError::ConflictAlreadyResolved(_)));
        assert!(f.db.records().get("field_visits", "v-1").await.unwrap().is_some());

        assert!(f
            .resolver
            .list_unresolved(&f.session_id, &f.owner)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_null_resolution_deletes_record() {
        let f = fixture().await;
        f.resolver
            .resolve_sync_conflict(&f.conflict_id, "discard", &Value::Null, &f.owner)
            .await
            .unwrap();
        assert!(f.db.records().get("field_visits", "v-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_users_cannot_resolve() {
        let f = fixture().await;
        let stranger = Identity::new("surveyor-2", "surveyor2", UserRole::Surveyor);

        let err = f
            .resolver
            .resolve_sync_conflict(&f.conflict_id, "merge", &visit_payload("nb-y"), &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Forbidden(_)));
        assert!(f.resolver.list_unresolved(&f.session_id, &stranger).await.is_err());

        let manager = Identity::new("manager-1", "mgr", UserRole::Manager);
        assert_eq!(
            f.resolver
                .list_unresolved(&f.session_id, &manager)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_owner_cannot_resolve_out_of_scope() {
        let f = fixture().await;
        let err = f
            .resolver
            .resolve_sync_conflict(&f.conflict_id, "merge", &visit_payload("nb-m"), &f.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Forbidden(_)));

        let conflict = f.db.conflicts().get(&f.conflict_id).await.unwrap().unwrap();
        assert_eq!(conflict.status, ConflictStatus::Unresolved);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let f = fixture().await;
        assert!(matches!(
            f.resolver
                .resolve_sync_conflict("missing", "merge", &json!({}), &f.owner)
                .await,
            Err(SyncError::ConflictNotFound(_))
        ));
        assert!(matches!(
            f.resolver
                .resolve_sync_conflict(&f.conflict_id, "", &json!({}), &f.owner)
                .await,
            Err(SyncError::Validation(_))
        ));
        assert!(matches!(
            f.resolver
                .resolve_sync_conflict(&f.conflict_id, "merge", &json!([1, 2]), &f.owner)
                .await,
            Err(SyncError::Validation(_))
        ));
    }
}
