//! # binaa-core: Pure Domain Logic for Binaa Field Sync
//!
//! This crate holds the types and rules of the offline field-sync engine
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Binaa Field Sync                                 │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Field devices (surveyors, engineers)               │   │
//! │  │    queue mutations offline ──► push / pull when connected       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP (apps/sync-api)                   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   binaa-sync (engine)                           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ binaa-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ geography │  │  access   │  │ validation│  │   │
//! │  │   │  Device   │  │  Scope    │  │  Policies │  │  payloads │  │   │
//! │  │   │ Operation │  │ Assignment│  │  Registry │  │  ids      │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Devices, sessions, operations, conflicts, records
//! - [`geography`] - Assignments, hierarchy levels, expanded scopes
//! - [`access`] - Identities, roles, table policies and access decisions
//! - [`tables`] - The synchronized tables and their policies
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use binaa_core::access::{evaluate_access, AccessAction, Identity, UserRole};
//! use binaa_core::geography::{GeoLevel, GeographicScope};
//! use binaa_core::tables::TableRegistry;
//! use binaa_core::types::SyncRecord;
//!
//! let registry = TableRegistry::standard();
//! let visits = registry.get("field_visits").unwrap();
//!
//! let mut scope = GeographicScope::default();
//! scope.insert(GeoLevel::Neighborhood, "nb-1");
//!
//! let user = Identity::new("u-1", "surveyor1", UserRole::Surveyor);
//! let record = SyncRecord::from_payload(
//!     "visit-1",
//!     serde_json::json!({ "neighborhood_id": "nb-1" }),
//!     None,
//! );
//!
//! let decision = evaluate_access(&visits.policy(), &user, AccessAction::Read, &record, Some(&scope));
//! assert!(decision.is_allowed());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod error;
pub mod geography;
pub mod tables;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use access::{AccessAction, AccessDecision, Identity, UserRole};
pub use error::{CoreError, ValidationError};
pub use geography::{GeoLevel, GeographicAssignment, GeographicScope};
pub use tables::{SyncTable, TableRegistry};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Page size used when a device does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 500;

/// Upper bound on a single differential-sync page.
pub const MAX_PAGE_LIMIT: u32 = 5_000;

/// Maximum operations accepted in one push request.
pub const MAX_BATCH_OPERATIONS: usize = 1_000;

/// Re-submissions allowed for a conflicted or failed operation before it is
/// dead-lettered. Matches the platform's worker retry limit.
pub const DEFAULT_MAX_OPERATION_RETRIES: i64 = 3;
