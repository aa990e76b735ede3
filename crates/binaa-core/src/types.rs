//! # Domain Types
//!
//! Core domain types of the field sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Device      │   │   SyncSession   │   │OfflineOperation │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (install)   │◄──│  device_id (FK) │◄──│  session_id(FK) │       │
//! │  │  user_id        │   │  session_type   │   │  table/record   │       │
//! │  │  is_active      │   │  status         │   │  kind, status   │       │
//! │  │  last_sync_at   │   │  counters       │   │  base_version   │       │
//! │  └─────────────────┘   └─────────────────┘   └────────┬────────┘       │
//! │                                                        │                │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌────────▼────────┐       │
//! │  │   SyncRecord    │   │   ChangePage    │   │  SyncConflict   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id, data       │──►│  records        │   │  conflict_type  │       │
//! │  │  version        │   │  next_since/id  │   │  client/server  │       │
//! │  │  geo columns    │   │  has_more       │   │  status         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Operation State Machine
//! ```text
//!                 ┌──────────┐
//!                 │ Pending  │
//!                 └────┬─────┘
//!         ┌────────────┼─────────────┐
//!         ▼            ▼             ▼
//!    ┌────────┐  ┌────────────┐  ┌───────┐
//!    │ Synced │  │ Conflicted │  │ Error │
//!    └────────┘  └─────┬──────┘  └───┬───┘
//!                      │ resubmitted │
//!                      └──────┬──────┘
//!                             ▼ retry_count >= max
//!                      ┌────────────┐
//!                      │ DeadLetter │
//!                      └────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::geography::GeoLevel;

// =============================================================================
// Device
// =============================================================================

/// A registered field device.
///
/// Devices are never deleted. Deactivation blocks new sessions and
/// operation submissions while keeping the audit trail intact.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Device {
    /// Hardware/install identifier chosen by the device.
    pub id: String,

    /// User that owns the device.
    pub user_id: String,

    /// Platform name ("android", "ios").
    pub platform: String,

    pub os_version: Option<String>,
    pub app_version: Option<String>,
    pub model: Option<String>,

    /// Whether the device may still sync.
    pub is_active: bool,

    /// When the device last completed a sync session.
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub registered_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Metadata a device sends when it registers or refreshes itself.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub platform: String,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

// =============================================================================
// Sync Session
// =============================================================================

/// Kind of sync round requested by the device.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Device pulls everything it is allowed to see.
    Full,
    /// Device pulls changes since its last watermark.
    Incremental,
}

/// Lifecycle of a sync session.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// One sync round of one device.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncSession {
    pub id: String,
    pub device_id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,

    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub ended_at: Option<DateTime<Utc>>,

    pub total_operations: i64,
    pub successful_operations: i64,
    pub failed_operations: i64,
    pub conflict_operations: i64,

    /// Set when the session is failed (explicitly or by the stale sweep).
    pub failure_reason: Option<String>,
}

/// Aggregate counters reported when a session completes.
///
/// All four are written in a single statement so a reader never observes a
/// half-updated session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionStats {
    pub total_operations: i64,
    pub successful_operations: i64,
    pub failed_operations: i64,
    pub conflict_operations: i64,
}

// =============================================================================
// Offline Operation
// =============================================================================

/// Mutation kind of an offline operation.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

/// Processing status of an offline operation.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Received, not yet applied.
    Pending,
    /// Applied to the central store.
    Synced,
    /// Collided with the server state; a SyncConflict was raised.
    Conflicted,
    /// Rejected (validation, access, missing record, storage failure).
    Error,
    /// Gave up after too many re-submissions.
    DeadLetter,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Synced => "synced",
            OperationStatus::Conflicted => "conflicted",
            OperationStatus::Error => "error",
            OperationStatus::DeadLetter => "dead_letter",
        }
    }

    /// Whether a re-submission of an operation in this state is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperationStatus::Conflicted | OperationStatus::Error)
    }
}

/// A mutation as queued on the device while offline.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedOperation {
    /// Device-generated operation id (UUID). Re-submitting the same id is
    /// idempotent once it has synced.
    pub id: String,

    pub record_id: String,

    pub kind: OperationKind,

    /// When the surveyor made the change on the device.
    #[ts(as = "String")]
    pub local_timestamp: DateTime<Utc>,

    /// Record version the device last saw. Required for update and delete.
    #[serde(default)]
    pub base_version: Option<i64>,

    #[serde(default)]
    pub before_data: Option<Value>,

    #[serde(default)]
    pub after_data: Option<Value>,
}

/// A persisted offline operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OfflineOperation {
    pub id: String,
    pub device_id: String,
    pub session_id: String,
    pub user_id: String,
    pub table_name: String,
    pub record_id: String,
    pub kind: OperationKind,

    #[ts(as = "String")]
    pub local_timestamp: DateTime<Utc>,

    /// Server clock when the operation was last processed.
    #[ts(as = "Option<String>")]
    pub server_timestamp: Option<DateTime<Utc>>,

    pub base_version: Option<i64>,

    pub before_data: Option<Value>,

    pub after_data: Option<Value>,

    pub status: OperationStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Per-operation result returned to the device after a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperationOutcome {
    pub operation_id: String,
    pub status: OperationStatus,
    /// Set when the operation raised a conflict.
    pub conflict_id: Option<String>,
    pub message: Option<String>,
}

/// Aggregate result of applying a batch of operations.
///
/// ## Invariant
/// `success + conflicts + errors == outcomes.len()` == number of submitted
/// operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BulkApplyResult {
    pub success: usize,
    pub conflicts: usize,
    pub errors: usize,
    pub outcomes: Vec<OperationOutcome>,
}

impl BulkApplyResult {
    /// Records one outcome and bumps the matching counter.
    pub fn record(&mut self, outcome: OperationOutcome) {
        match outcome.status {
            OperationStatus::Synced => self.success += 1,
            OperationStatus::Conflicted => self.conflicts += 1,
            OperationStatus::Pending | OperationStatus::Error | OperationStatus::DeadLetter => {
                self.errors += 1
            }
        }
        self.outcomes.push(outcome);
    }

    /// Total operations accounted for.
    pub fn total(&self) -> usize {
        self.success + self.conflicts + self.errors
    }

    /// Session counters matching this batch.
    pub fn as_stats(&self) -> SessionStats {
        SessionStats {
            total_operations: self.total() as i64,
            successful_operations: self.success as i64,
            failed_operations: self.errors as i64,
            conflict_operations: self.conflicts as i64,
        }
    }
}

// =============================================================================
// Sync Conflict
// =============================================================================

/// Why an operation collided with the server state.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Update targeted a record the server does not have.
    RecordMissing,
    /// Device edited an older version than the server holds.
    VersionMismatch,
    /// Another writer committed between the version check and the write.
    ConcurrentWrite,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::RecordMissing => "record_missing",
            ConflictType::VersionMismatch => "version_mismatch",
            ConflictType::ConcurrentWrite => "concurrent_write",
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// A collision raised by bulk apply, waiting for an explicit resolution.
///
/// Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncConflict {
    pub id: String,
    pub session_id: String,
    pub operation_id: String,
    pub table_name: String,
    pub record_id: String,
    pub conflict_type: ConflictType,

    pub client_data: Option<Value>,

    pub server_data: Option<Value>,

    pub status: ConflictStatus,

    /// Opaque label chosen by the resolver ("server_wins", "merge", ...).
    pub resolution_strategy: Option<String>,

    pub resolved_data: Option<Value>,

    pub resolved_by: Option<String>,

    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sync Record
// =============================================================================

/// A row of any synchronized table.
///
/// `data` is the full payload as the device sees it. The geographic columns,
/// `assigned_user_id` and `created_by` are lifted out of the payload so the
/// access filter and SQL indexes can see them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncRecord {
    pub id: String,

    pub data: Value,

    /// Starts at 1, incremented on every server-side write.
    pub version: i64,

    pub governorate_id: Option<String>,
    pub district_id: Option<String>,
    pub sub_district_id: Option<String>,
    pub neighborhood_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub created_by: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Builds a record from a device payload.
    ///
    /// Location keys and `assigned_user_id` are read from the payload and
    /// may be strings or numbers. `created_by` falls back to the payload when
    /// not given. Version is 0 until the server stores it.
    pub fn from_payload(id: impl Into<String>, data: Value, created_by: Option<String>) -> Self {
        let now = Utc::now();
        let created_by = created_by.or_else(|| payload_key(&data, "created_by"));

        SyncRecord {
            id: id.into(),
            governorate_id: payload_key(&data, GeoLevel::Governorate.column()),
            district_id: payload_key(&data, GeoLevel::District.column()),
            sub_district_id: payload_key(&data, GeoLevel::SubDistrict.column()),
            neighborhood_id: payload_key(&data, GeoLevel::Neighborhood.column()),
            assigned_user_id: payload_key(&data, "assigned_user_id"),
            created_by,
            data,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Location identifier at the given hierarchy level.
    pub fn location(&self, level: GeoLevel) -> Option<&str> {
        let value = match level {
            GeoLevel::Governorate => &self.governorate_id,
            GeoLevel::District => &self.district_id,
            GeoLevel::SubDistrict => &self.sub_district_id,
            GeoLevel::Neighborhood => &self.neighborhood_id,
        };
        value.as_deref()
    }
}

/// Reads a scalar key from a JSON object as a string.
///
/// Empty strings and non-scalar values count as absent.
pub fn payload_key(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One page of a differential sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangePage {
    pub table: String,
    pub records: Vec<SyncRecord>,

    /// Watermark of the last row scanned. The device passes it back as
    /// `since` on the next pull. Equal to the request's `since` when no rows
    /// were scanned.
    #[ts(as = "Option<String>")]
    pub next_since: Option<DateTime<Utc>>,

    /// Id of the last row scanned, passed back as `after_id` together with
    /// `next_since`.
    pub next_id: Option<String>,

    /// Whether the scan stopped at the page limit.
    pub has_more: bool,
}

impl ChangePage {
    /// A page with no records that leaves the cursor where it was.
    pub fn empty(
        table: impl Into<String>,
        since: Option<DateTime<Utc>>,
        after_id: Option<&str>,
    ) -> Self {
        ChangePage {
            table: table.into(),
            records: Vec::new(),
            next_since: since,
            next_id: after_id.map(str::to_string),
            has_more: false,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
