//! # binaa-sync: Sync Engine for Binaa Field Sync
//!
//! Server side of offline synchronization for field devices: which rows a
//! device may pull, how its queued mutations are applied, and how
//! collisions are recorded for explicit resolution.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine (engine.rs)                         │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Scope Expander │─►│ Access Filter  │─►│ DifferentialSyncQuery  │    │
//! │  │                │  │                │  │                        │    │
//! │  │ assignments ─► │  │ LBAC + RBAC    │  │ rows changed after a   │    │
//! │  │ visible geo ids│  │ per record     │  │ watermark, filtered    │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │  ┌────────────────┐  ┌───────▼────────┐  ┌────────────────────────┐    │
//! │  │ DeviceRegistry │  │ OfflineOp Log  │─►│ ConflictResolver       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ register,      │  │ bulk apply,    │  │ unresolved ─► resolved │    │
//! │  │ deactivate     │  │ retries, DLQ   │  │ (explicit only)        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  SyncSessionManager: active ─► completed | failed (+ stale sweeper)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`scope`] - Geographic scope expansion from assignments
//! - [`access`] - Record-level access filtering
//! - [`changes`] - Differential (watermark) sync queries
//! - [`operations`] - Offline operation log and bulk apply
//! - [`conflicts`] - Conflict listing and resolution
//! - [`devices`] - Device registration and activation
//! - [`sessions`] - Session lifecycle and stale session sweeper
//! - [`engine`] - Facade wiring the above together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use binaa_sync::{SyncEngine, SyncSettings};
//!
//! let engine = SyncEngine::new(db, SyncSettings::default())?;
//! let sweeper = engine.start_sweeper();
//!
//! let session = engine.sessions().create_session(&user, "tab-001", SessionType::Full).await?;
//! let result = engine.submit_operations(&user, &session.id, "field_visits", ops).await?;
//! engine.sessions().complete_sync_session(&user, &session.id, None, &result.as_stats()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod changes;
pub mod config;
pub mod conflicts;
pub mod devices;
pub mod engine;
pub mod error;
pub mod operations;
pub mod scope;
pub mod sessions;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use access::AccessFilter;
pub use changes::DifferentialSyncQuery;
pub use config::SyncSettings;
pub use conflicts::ConflictResolver;
pub use devices::DeviceRegistry;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use operations::OfflineOperationLog;
pub use scope::GeographicScopeExpander;
pub use sessions::{SessionSweeper, SessionSweeperHandle, SyncSessionManager};
