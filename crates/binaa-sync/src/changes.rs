//! # Differential Sync
//!
//! Pages of rows changed since a device's watermark, already filtered for
//! the caller.
//!
//! ## Paging
//! ```text
//!   (since, after_id) ──► SELECT … WHERE (watermark, id) > (since, after_id)
//!                             ORDER BY watermark, id LIMIT n
//!                                  │
//!           (next_since, next_id) = (watermark, id) of the LAST ROW SCANNED
//!                                  │   (before filtering, so denied rows are
//!                                  │    never rescanned)
//!                                  ▼
//!                         AccessFilter ──► ChangePage
//! ```
//!
//! Rows sharing one watermark may straddle a page boundary; the id half of
//! the cursor picks up where the previous page stopped.
//!
//! Unknown or malformed table names and tables the caller may not read give
//! an empty page, never an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use binaa_core::access::Identity;
use binaa_core::tables::Watermark;
use binaa_core::validation::{validate_page_limit, validate_table_name};
use binaa_core::{ChangePage, SyncRecord, TableRegistry, ValidationError};
use binaa_db::Database;

use crate::access::{filter_with_scope, AccessFilter};
use crate::config::SyncSettings;
use crate::error::SyncResult;

/// Reads changed rows for a device.
#[derive(Debug, Clone)]
pub struct DifferentialSyncQuery {
    db: Database,
    registry: Arc<TableRegistry>,
    filter: AccessFilter,
    max_page_limit: u32,
}

impl DifferentialSyncQuery {
    pub fn new(
        db: Database,
        registry: Arc<TableRegistry>,
        filter: AccessFilter,
        settings: &SyncSettings,
    ) -> Self {
        DifferentialSyncQuery {
            db,
            registry,
            filter,
            max_page_limit: settings.max_page_limit,
        }
    }

    /// Rows of `table` after the cursor `(since, after_id)`, visible to
    /// `user`.
    ///
    /// Without `after_id` the watermark must be strictly after `since`.
    /// `after_id` without `since` is rejected, as is a `limit` of zero;
    /// larger limits are clamped to the configured maximum.
    pub async fn get_changed_records(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
        after_id: Option<&str>,
        limit: Option<u32>,
        user: &Identity,
    ) -> SyncResult<ChangePage> {
        let limit = validate_page_limit(limit, self.max_page_limit)?;
        if after_id.is_some() && since.is_none() {
            return Err(ValidationError::invalid_format("after_id", "requires since").into());
        }

        if validate_table_name(table).is_err() {
            info!(table, user_id = %user.id, "Malformed table name in pull");
            return Ok(ChangePage::empty(table, since, after_id));
        }
        let Some(sync_table) = self.registry.get(table) else {
            info!(table, user_id = %user.id, "Pull for unsynchronized table");
            return Ok(ChangePage::empty(table, since, after_id));
        };

        let policy = sync_table.policy();
        if policy.is_unmigrated() && user.role.is_restricted_field_role() {
            info!(
                table,
                user_id = %user.id,
                role = user.role.as_str(),
                "Table has no access policy, returning nothing to restricted role"
            );
            return Ok(ChangePage::empty(table, since, after_id));
        }

        let scope = self.filter.scope_for(sync_table.as_ref(), user).await;
        if policy.lbac.is_some() && scope.as_ref().map_or(true, |s| s.is_empty()) {
            debug!(table, user_id = %user.id, "Empty scope, skipping scan");
            return Ok(ChangePage::empty(table, since, after_id));
        }

        let watermark = sync_table.watermark();
        let rows = self
            .db
            .records()
            .changed_since(sync_table.name(), watermark.column(), since, after_id, limit)
            .await?;

        let scanned = rows.len();
        let has_more = scanned as u64 >= u64::from(limit);
        let (next_since, next_id) = match rows.last() {
            Some(last) => (Some(watermark_of(watermark, last)), Some(last.id.clone())),
            None => (since, after_id.map(str::to_string)),
        };

        let records = filter_with_scope(sync_table.as_ref(), rows, user, scope.as_ref());

        debug!(
            table,
            user_id = %user.id,
            scanned,
            returned = records.len(),
            has_more,
            "Served change page"
        );

        Ok(ChangePage {
            table: sync_table.name().to_string(),
            records,
            next_since,
            next_id,
            has_more,
        })
    }
}

fn watermark_of(watermark: Watermark, record: &SyncRecord) -> DateTime<Utc> {
    match watermark {
        Watermark::UpdatedAt => record.updated_at,
        Watermark::CreatedAt => record.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::GeographicScopeExpander;
    use crate::testing::{assign, located, seed_hierarchy, test_db};
    use binaa_core::{GeoLevel, UserRole};
    use chrono::Duration;
    use serde_json::json;

    fn query(db: &Database, max_page_limit: u32) -> DifferentialSyncQuery {
        let settings = SyncSettings {
            max_page_limit,
            ..SyncSettings::default()
        };
        DifferentialSyncQuery::new(
            db.clone(),
            Arc::new(TableRegistry::standard()),
            AccessFilter::new(GeographicScopeExpander::new(db.clone())),
            &settings,
        )
    }

    fn surveyor() -> Identity {
        Identity::new("surveyor-1", "surveyor1", UserRole::Surveyor)
    }

    #[tokio::test]
    async fn test_watermark_is_strictly_after_since() {
        let db = test_db().await;
        seed_hierarchy(&db).await;
        assign(&db, "surveyor-1", GeoLevel::District, "dist-shuub").await;

        let base = binaa_db::now() - Duration::hours(1);
        for (i, id) in ["v-1", "v-2", "v-3"].iter().enumerate() {
            db.records()
                .upsert("field_visits", &located(id, "nb-y"), base + Duration::minutes(i as i64))
                .await
                .unwrap();
        }

        let since = base + Duration::minutes(1);
        let page = query(&db, 100)
            .get_changed_records("field_visits", Some(since), None, None, &surveyor())
            .await
            .unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].id, "v-3");
        assert!(page.records.iter().all(|r| r.updated_at > since));
        assert_eq!(page.next_since, Some(base + Duration::minutes(2)));
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_paging_advances_past_denied_rows() {
        let db = test_db().await;
        seed_hierarchy(&db).await;
        assign(&db, "surveyor-1", GeoLevel::District, "dist-shuub").await;

        let base = binaa_db::now() - Duration::hours(1);
        db.records()
            .upsert("field_visits", &located("v-out", "nb-m"), base)
            .await
            .unwrap();
        db.records()
            .upsert("field_visits", &located("v-in", "nb-y"), base + Duration::seconds(1))
            .await
            .unwrap();

        let q = query(&db, 1);
        let first = q
            .get_changed_records("field_visits", None, None, Some(50), &surveyor())
            .await
            .unwrap();
        assert!(first.records.is_empty(), "v-out is outside scope");
        assert!(first.has_more);
        assert_eq!(first.next_since, Some(base));

        let second = q
            .get_changed_records(
                "field_visits",
                first.next_since,
                first.next_id.as_deref(),
                Some(50),
                &surveyor(),
            )
            .await
            .unwrap();
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].id, "v-in");
    }

    #[tokio::test]
    async fn test_paging_through_shared_watermark_delivers_every_row() {
        let db = test_db().await;
        seed_hierarchy(&db).await;
        assign(&db, "surveyor-1", GeoLevel::District, "dist-shuub").await;

        let at = binaa_db::now() - Duration::minutes(10);
        for id in ["v-1", "v-2", "v-3"] {
            db.records()
                .upsert("field_visits", &located(id, "nb-y"), at)
                .await
                .unwrap();
        }

        let q = query(&db, 100);
        let mut seen = Vec::new();
        let (mut since, mut after_id) = (None, None::<String>);
        loop {
            let page = q
                .get_changed_records("field_visits", since, after_id.as_deref(), Some(2), &surveyor())
                .await
                .unwrap();
            seen.extend(page.records.iter().map(|r| r.id.clone()));
            since = page.next_since;
            after_id = page.next_id;
            if !page.has_more {
                break;
            }
        }

        assert_eq!(seen, vec!["v-1", "v-2", "v-3"]);
        assert_eq!(since, Some(at));
        assert_eq!(after_id.as_deref(), Some("v-3"));
    }

    #[tokio::test]
    async fn test_cursor_id_without_since_is_rejected() {
        let db = test_db().await;
        let err = query(&db, 100)
            .get_changed_records("field_visits", None, Some("v-1"), None, &surveyor())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_survey_points_use_created_at() {
        let db = test_db().await;
        seed_hierarchy(&db).await;
        assign(&db, "surveyor-1", GeoLevel::District, "dist-shuub").await;

        let at = binaa_db::now() - Duration::minutes(5);
        let point = SyncRecord::from_payload(
            "pt-1",
            json!({ "sub_district_id": "sub-x", "latitude": 15.35, "longitude": 44.2 }),
            None,
        );
        db.records().upsert("survey_points", &point, at).await.unwrap();

        let page = query(&db, 100)
            .get_changed_records("survey_points", None, None, None, &surveyor())
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_since, Some(at));
    }

    #[tokio::test]
    async fn test_engineer_on_applications_gets_nothing() {
        let db = test_db().await;
        db.records()
            .upsert(
                "applications",
                &SyncRecord::from_payload("app-1", json!({ "status": "submitted" }), None),
                binaa_db::now(),
            )
            .await
            .unwrap();

        let engineer = Identity::new("engineer-1", "eng", UserRole::Engineer);
        let page = query(&db, 100)
            .get_changed_records("applications", None, None, None, &engineer)
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_since, None);

        let manager = Identity::new("manager-1", "mgr", UserRole::Manager);
        let page = query(&db, 100)
            .get_changed_records("applications", None, None, None, &manager)
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tables_are_empty() {
        let db = test_db().await;
        let q = query(&db, 100);
        let since = Some(binaa_db::now());

        let page = q
            .get_changed_records("users", since, None, None, &surveyor())
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_since, since);

        let page = q
            .get_changed_records("field_visits; DROP TABLE devices", None, None, None, &surveyor())
            .await
            .unwrap();
        assert!(page.records.is_empty());

        assert!(q
            .get_changed_records("field_visits", None, None, Some(0), &surveyor())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_appointments_filtered_by_predicate() {
        let db = test_db().await;
        let at = binaa_db::now();
        for (id, assignee) in [("apt-1", "engineer-1"), ("apt-2", "engineer-2")] {
            db.records()
                .upsert(
                    "appointments",
                    &SyncRecord::from_payload(id, json!({ "assigned_user_id": assignee }), None),
                    at,
                )
                .await
                .unwrap();
        }

        let engineer = Identity::new("engineer-1", "eng", UserRole::Engineer);
        let page = query(&db, 100)
            .get_changed_records("appointments", None, None, None, &engineer)
            .await
            .unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["apt-1"]);
    }
}
