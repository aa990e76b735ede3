//! # Geographic Scope Expansion
//!
//! Turns a user's direct assignments into every location they may see.
//!
//! ```text
//!   assignments(user) ──► effective at now? ──► root = most specific id
//!                                                  │
//!                        root active? ── no ──► warn!, skip
//!                                                  │ yes
//!                                                  ▼
//!                                 root + active descendants (binaa-db)
//!                                                  │
//!                                     merge into GeographicScope
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use binaa_core::GeographicScope;
use binaa_db::Database;

use crate::error::SyncResult;

/// Expands assignments into a [`GeographicScope`]. Stateless; the scope is
/// recomputed on every call.
#[derive(Debug, Clone)]
pub struct GeographicScopeExpander {
    db: Database,
}

impl GeographicScopeExpander {
    pub fn new(db: Database) -> Self {
        GeographicScopeExpander { db }
    }

    /// The user's scope right now. No assignments means an empty scope.
    pub async fn expand_scope(&self, user_id: &str) -> SyncResult<GeographicScope> {
        self.expand_scope_at(user_id, binaa_db::now()).await
    }

    /// The user's scope at `now`.
    pub async fn expand_scope_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> SyncResult<GeographicScope> {
        let geography = self.db.geography();
        let assignments = geography.active_assignments(user_id).await?;

        let mut scope = GeographicScope::empty();
        for assignment in assignments.iter().filter(|a| a.is_effective_at(now)) {
            let Some((level, root_id)) = assignment.root() else {
                warn!(
                    user_id,
                    assignment_id = %assignment.id,
                    "Assignment names no location, skipping"
                );
                continue;
            };

            match geography.entity_is_active(level, root_id).await? {
                Some(true) => {}
                Some(false) => {
                    warn!(
                        user_id,
                        assignment_id = %assignment.id,
                        level = level.as_str(),
                        root_id,
                        "Assignment root is inactive, skipping"
                    );
                    continue;
                }
                None => {
                    warn!(
                        user_id,
                        assignment_id = %assignment.id,
                        level = level.as_str(),
                        root_id,
                        "Assignment root does not exist, skipping"
                    );
                    continue;
                }
            }

            scope.merge(geography.subtree(level, root_id).await?);
        }

        debug!(
            user_id,
            governorates = scope.governorates.len(),
            districts = scope.districts.len(),
            sub_districts = scope.sub_districts.len(),
            neighborhoods = scope.neighborhoods.len(),
            "Expanded geographic scope"
        );
        Ok(scope)
    }
}
