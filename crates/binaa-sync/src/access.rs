//! # Access Filter
//!
//! Applies table policies to candidate records for a caller. Reads drop
//! denied records silently; writes are checked one record at a time with
//! [`AccessFilter::can_write`].
//!
//! The decision itself is [`binaa_core::access::evaluate_access`]; this
//! layer supplies the caller's scope and logs every denial.

use tracing::{debug, info, warn};

use binaa_core::access::{evaluate_access, AccessAction, AccessDecision, DenyReason, Identity};
use binaa_core::{GeographicScope, SyncRecord, SyncTable};

use crate::scope::GeographicScopeExpander;

/// Scope lookup plus per-record policy evaluation.
#[derive(Debug, Clone)]
pub struct AccessFilter {
    expander: GeographicScopeExpander,
}

impl AccessFilter {
    pub fn new(expander: GeographicScopeExpander) -> Self {
        AccessFilter { expander }
    }

    /// The scope a table's policy needs for this caller.
    ///
    /// `None` when the table has no LBAC level, or when expansion failed.
    /// LBAC evaluation treats a missing scope as empty.
    pub async fn scope_for(&self, table: &dyn SyncTable, user: &Identity) -> Option<GeographicScope> {
        table.policy().lbac?;

        match self.expander.expand_scope(&user.id).await {
            Ok(scope) => Some(scope),
            Err(e) => {
                warn!(
                    table = table.name(),
                    user_id = %user.id,
                    error = %e,
                    "Scope expansion failed, denying location-scoped access"
                );
                None
            }
        }
    }

    /// Records from `records` the caller may read, in their original order.
    pub async fn filter_records(
        &self,
        table: &dyn SyncTable,
        records: Vec<SyncRecord>,
        user: &Identity,
    ) -> Vec<SyncRecord> {
        let scope = self.scope_for(table, user).await;
        filter_with_scope(table, records, user, scope.as_ref())
    }

    /// Checks one write. Returns the reason on denial.
    pub fn can_write(
        &self,
        table: &dyn SyncTable,
        user: &Identity,
        action: AccessAction,
        record: &SyncRecord,
        scope: Option<&GeographicScope>,
    ) -> Result<(), DenyReason> {
        match evaluate_access(&table.policy(), user, action, record, scope) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) => {
                log_denial(table, user, action, &record.id, &reason);
                Err(reason)
            }
        }
    }
}

/// Read filter over a precomputed scope.
pub fn filter_with_scope(
    table: &dyn SyncTable,
    records: Vec<SyncRecord>,
    user: &Identity,
    scope: Option<&GeographicScope>,
) -> Vec<SyncRecord> {
    let policy = table.policy();
    let candidates = records.len();

    let allowed: Vec<SyncRecord> = records
        .into_iter()
        .filter(|record| {
            match evaluate_access(&policy, user, AccessAction::Read, record, scope) {
                AccessDecision::Allow => true,
                AccessDecision::Deny(reason) => {
                    log_denial(table, user, AccessAction::Read, &record.id, &reason);
                    false
                }
            }
        })
        .collect();

    debug!(
        table = table.name(),
        user_id = %user.id,
        candidates,
        allowed = allowed.len(),
        "Filtered records"
    );
    allowed
}

fn log_denial(
    table: &dyn SyncTable,
    user: &Identity,
    action: AccessAction,
    record_id: &str,
    reason: &DenyReason,
) {
    match reason {
        DenyReason::PredicateFailed(_) => warn!(
            table = table.name(),
            record_id,
            user_id = %user.id,
            role = user.role.as_str(),
            action = action.as_str(),
            reason = %reason,
            "Access denied"
        ),
        _ => info!(
            table = table.name(),
            record_id,
            user_id = %user.id,
            role = user.role.as_str(),
            action = action.as_str(),
            reason = %reason,
            "Access denied"
        ),
    }
}
