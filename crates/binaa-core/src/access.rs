//! # Access Decisions
//!
//! Pure LBAC/RBAC evaluation for a single record.
//!
//! ## Evaluation Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     evaluate_access(policy, user, record)               │
//! │                                                                         │
//! │  policy.lbac = Some(level)?                                             │
//! │     yes ──► record.location(level) ∈ scope.ids(level) ? Allow : Deny    │
//! │     no                                                                  │
//! │      │                                                                  │
//! │  policy.rbac = Some(predicate)?                                         │
//! │     yes ──► predicate(..) = Ok(true) ? Allow : Deny   (Err ⇒ Deny)      │
//! │     no                                                                  │
//! │      │                                                                  │
//! │  user.role restricted field role (engineer, surveyor, citizen)?         │
//! │     yes ──► Deny (table has no policy yet)                              │
//! │     no  ──► Allow                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fail-secure: a missing scope, missing location, or predicate error all
//! deny.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::geography::{GeoLevel, GeographicScope};
use crate::types::SyncRecord;

// =============================================================================
// Identity
// =============================================================================

/// Roles issued by the identity subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Manager,
    Employee,
    Engineer,
    Surveyor,
    Citizen,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Employee => "employee",
            UserRole::Engineer => "engineer",
            UserRole::Surveyor => "surveyor",
            UserRole::Citizen => "citizen",
        }
    }

    /// Roles denied by default on tables without an access policy.
    pub fn is_restricted_field_role(&self) -> bool {
        matches!(
            self,
            UserRole::Engineer | UserRole::Surveyor | UserRole::Citizen
        )
    }

    /// Roles allowed to manage other users' devices.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Manager)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "employee" => Ok(UserRole::Employee),
            "engineer" => Ok(UserRole::Engineer),
            "surveyor" => Ok(UserRole::Surveyor),
            "citizen" => Ok(UserRole::Citizen),
            _ => Err(ValidationError::NotAllowed {
                field: "role".to_string(),
                allowed: [
                    "admin", "manager", "employee", "engineer", "surveyor", "citizen",
                ]
                .iter()
                .map(|r| r.to_string())
                .collect(),
            }),
        }
    }
}

/// An established caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub role: UserRole,
}

impl Identity {
    pub fn new(id: impl Into<String>, username: impl Into<String>, role: UserRole) -> Self {
        Identity {
            id: id.into(),
            username: username.into(),
            role,
        }
    }
}

/// What the caller wants to do with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    Read,
    Create,
    Update,
    Delete,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Read => "read",
            AccessAction::Create => "create",
            AccessAction::Update => "update",
            AccessAction::Delete => "delete",
        }
    }
}

// =============================================================================
// Table Policy
// =============================================================================

/// Failure while evaluating an RBAC predicate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("record has no {0} field")]
    MissingField(&'static str),

    #[error("{0}")]
    Invalid(String),
}

/// Per-record RBAC predicate: `(user, action, record_id, record)`.
pub type RecordPredicate =
    fn(&Identity, AccessAction, &str, &SyncRecord) -> Result<bool, PolicyError>;

/// Access policy registered for a synchronized table.
///
/// LBAC takes precedence when both are present.
#[derive(Clone, Copy, Default)]
pub struct TablePolicy {
    /// Hierarchy level whose column decides visibility.
    pub lbac: Option<GeoLevel>,
    pub rbac: Option<RecordPredicate>,
}

impl TablePolicy {
    pub fn lbac(level: GeoLevel) -> Self {
        TablePolicy {
            lbac: Some(level),
            rbac: None,
        }
    }

    pub fn rbac(predicate: RecordPredicate) -> Self {
        TablePolicy {
            lbac: None,
            rbac: Some(predicate),
        }
    }

    /// No policy registered.
    pub fn none() -> Self {
        TablePolicy::default()
    }

    pub fn is_unmigrated(&self) -> bool {
        self.lbac.is_none() && self.rbac.is_none()
    }
}

impl fmt::Debug for TablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TablePolicy")
            .field("lbac", &self.lbac)
            .field("rbac", &self.rbac.is_some())
            .finish()
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Why a record was withheld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Record location is not in the caller's scope.
    OutsideScope { level: GeoLevel },
    /// Record carries no value in the LBAC column.
    MissingLocation { level: GeoLevel },
    /// RBAC predicate returned false.
    PredicateDenied,
    /// RBAC predicate failed.
    PredicateFailed(String),
    /// Table has no policy and the caller has a restricted role.
    UnmigratedTable,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::OutsideScope { level } => write!(f, "{} outside scope", level),
            DenyReason::MissingLocation { level } => write!(f, "record has no {}", level),
            DenyReason::PredicateDenied => f.write_str("rbac predicate denied"),
            DenyReason::PredicateFailed(msg) => write!(f, "rbac predicate failed: {}", msg),
            DenyReason::UnmigratedTable => f.write_str("no access policy for restricted role"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decides whether `user` may perform `action` on `record`.
///
/// `scope` is only consulted for LBAC tables; `None` there means the scope
/// could not be produced and is treated as empty.
pub fn evaluate_access(
    policy: &TablePolicy,
    user: &Identity,
    action: AccessAction,
    record: &SyncRecord,
    scope: Option<&GeographicScope>,
) -> AccessDecision {
    if let Some(level) = policy.lbac {
        let Some(location) = record.location(level) else {
            return AccessDecision::Deny(DenyReason::MissingLocation { level });
        };
        return match scope {
            Some(scope) if scope.contains(level, location) => AccessDecision::Allow,
            _ => AccessDecision::Deny(DenyReason::OutsideScope { level }),
        };
    }

    if let Some(predicate) = policy.rbac {
        return match predicate(user, action, &record.id, record) {
            Ok(true) => AccessDecision::Allow,
            Ok(false) => AccessDecision::Deny(DenyReason::PredicateDenied),
            Err(e) => AccessDecision::Deny(DenyReason::PredicateFailed(e.to_string())),
        };
    }

    if user.role.is_restricted_field_role() {
        AccessDecision::Deny(DenyReason::UnmigratedTable)
    } else {
        AccessDecision::Allow
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
