//! # Synchronized Tables
//!
//! Every table a device can pull from or push to is a [`SyncTable`]
//! registered in the [`TableRegistry`]. The registry is the only source of
//! SQL identifiers used by the engine: request input never reaches a table
//! or column name.
//!
//! | Table            | Policy                      | Watermark    |
//! |------------------|-----------------------------|--------------|
//! | `field_visits`   | LBAC, neighborhood          | `updated_at` |
//! | `survey_points`  | LBAC, sub-district          | `created_at` |
//! | `appointments`   | RBAC, assignee / requester  | `updated_at` |
//! | `applications`   | none (not yet migrated)     | `updated_at` |

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::access::{AccessAction, Identity, PolicyError, TablePolicy, UserRole};
use crate::error::ValidationError;
use crate::geography::GeoLevel;
use crate::types::{OperationKind, SyncRecord};
use crate::validation::{validate_coordinates, ValidationResult};

// =============================================================================
// Watermark
// =============================================================================

/// Timestamp column differential sync advances by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    UpdatedAt,
    /// Append-only tables never update rows.
    CreatedAt,
}

impl Watermark {
    pub const fn column(&self) -> &'static str {
        match self {
            Watermark::UpdatedAt => "updated_at",
            Watermark::CreatedAt => "created_at",
        }
    }
}

// =============================================================================
// SyncTable Trait
// =============================================================================

/// A table exposed to field devices.
pub trait SyncTable: Send + Sync + Debug {
    /// SQL table name. Must be a static identifier.
    fn name(&self) -> &'static str;

    fn watermark(&self) -> Watermark {
        Watermark::UpdatedAt
    }

    fn policy(&self) -> TablePolicy;

    /// Table-specific payload checks, run before any write.
    fn validate_payload(&self, _data: &Value) -> ValidationResult<()> {
        Ok(())
    }

    /// Append-only tables accept creates only.
    fn append_only(&self) -> bool {
        self.watermark() == Watermark::CreatedAt
    }

    /// Rejects operation kinds the table does not accept.
    fn check_operation(&self, kind: OperationKind) -> ValidationResult<()> {
        if self.append_only() && kind != OperationKind::Create {
            return Err(ValidationError::OperationNotPermitted {
                table: self.name().to_string(),
                operation: kind.as_str().to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Inspection visits, visible by neighborhood.
#[derive(Debug, Default)]
pub struct FieldVisits;

impl SyncTable for FieldVisits {
    fn name(&self) -> &'static str {
        "field_visits"
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::lbac(GeoLevel::Neighborhood)
    }
}

/// GPS survey points. Append-only; visible by sub-district.
#[derive(Debug, Default)]
pub struct SurveyPoints;

impl SyncTable for SurveyPoints {
    fn name(&self) -> &'static str {
        "survey_points"
    }

    fn watermark(&self) -> Watermark {
        Watermark::CreatedAt
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::lbac(GeoLevel::SubDistrict)
    }

    fn validate_payload(&self, data: &Value) -> ValidationResult<()> {
        let latitude = data
            .get("latitude")
            .and_then(Value::as_f64)
            .ok_or_else(|| ValidationError::required("latitude"))?;
        let longitude = data
            .get("longitude")
            .and_then(Value::as_f64)
            .ok_or_else(|| ValidationError::required("longitude"))?;
        validate_coordinates(latitude, longitude)
    }
}

/// Site appointments, visible by role and ownership.
#[derive(Debug, Default)]
pub struct Appointments;

impl SyncTable for Appointments {
    fn name(&self) -> &'static str {
        "appointments"
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::rbac(appointment_predicate)
    }
}

/// Staff see every appointment. Field staff see the ones assigned to them,
/// citizens the ones they booked.
fn appointment_predicate(
    user: &Identity,
    _action: AccessAction,
    _record_id: &str,
    record: &SyncRecord,
) -> Result<bool, PolicyError> {
    match user.role {
        UserRole::Admin | UserRole::Manager | UserRole::Employee => Ok(true),
        UserRole::Engineer | UserRole::Surveyor => {
            let assignee = record
                .assigned_user_id
                .as_deref()
                .ok_or(PolicyError::MissingField("assigned_user_id"))?;
            Ok(assignee == user.id)
        }
        UserRole::Citizen => {
            let creator = record
                .created_by
                .as_deref()
                .ok_or(PolicyError::MissingField("created_by"))?;
            Ok(creator == user.id)
        }
    }
}

/// Licence applications. No policy yet: staff only.
#[derive(Debug, Default)]
pub struct Applications;

impl SyncTable for Applications {
    fn name(&self) -> &'static str {
        "applications"
    }

    fn policy(&self) -> TablePolicy {
        TablePolicy::none()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Lookup of synchronized tables by name. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<&'static str, Arc<dyn SyncTable>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every table of the platform.
    pub fn standard() -> Self {
        let mut registry = TableRegistry::new();
        registry.register(FieldVisits);
        registry.register(SurveyPoints);
        registry.register(Appointments);
        registry.register(Applications);
        registry
    }

    pub fn register<T: SyncTable + 'static>(&mut self, table: T) {
        self.tables.insert(table.name(), Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SyncTable>> {
        self.tables.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tables.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
