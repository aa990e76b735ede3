//! # binaa-db: Database Layer for Binaa Field Sync
//!
//! This crate provides database access for the sync engine.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Binaa Sync Data Flow                             │
//! │                                                                         │
//! │  binaa-sync (DifferentialSyncQuery, OfflineOperationLog, ...)          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     binaa-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ DeviceRepo    │    │ 001_geo      │  │   │
//! │  │   │ SqlitePool    │◄───│ SessionRepo   │    │ 002_sync     │  │   │
//! │  │   │ Transactions  │    │ OperationRepo │    │ 003_tables   │  │   │
//! │  │   │               │    │ ConflictRepo  │    │              │  │   │
//! │  │   │               │    │ GeographyRepo │    │              │  │   │
//! │  │   │               │    │ RecordRepo    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use binaa_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("binaa.db")).await?;
//! let device = db.devices().get("pixel-7-abc").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbTransaction};

// Repository re-exports for convenience
pub use repository::conflicts::ConflictRepository;
pub use repository::devices::DeviceRepository;
pub use repository::geography::GeographyRepository;
pub use repository::operations::OperationRepository;
pub use repository::records::RecordRepository;
pub use repository::sessions::SessionRepository;
pub use repository::{db_timestamp, now};
