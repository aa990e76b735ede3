//! # Binaa Sync API
//!
//! HTTP server for offline field devices.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync API Server                                │
//! │                                                                         │
//! │  Tablet ──► axum router ──► require_auth (JWT) ──► handler             │
//! │                                                       │                 │
//! │                                                       ▼                 │
//! │                                                  SyncEngine             │
//! │                                                       │                 │
//! │                                                       ▼                 │
//! │                                                 SQLite (binaa-db)       │
//! │                                                                         │
//! │  background: SessionSweeper (stale sessions ──► failed)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! TOML file (`--config <path>` or the platform config dir), overridden by:
//! - `BINAA_BIND_ADDR` - listen address (default: 0.0.0.0:8080)
//! - `BINAA_DATABASE_PATH` - SQLite file
//! - `BINAA_MAX_CONNECTIONS` - pool size (default: 10)
//! - `BINAA_JWT_SECRET` - HS256 secret shared with the identity service
//! - `BINAA_MAX_PAGE_LIMIT` - differential page cap (default: 5000)
//! - `BINAA_MAX_OPERATION_RETRIES` - retries before dead-lettering (default: 3)
//! - `BINAA_SESSION_TIMEOUT_SECS` - stale session timeout (default: 3600)
//! - `BINAA_SWEEP_INTERVAL_SECS` - sweep interval, 0 disables (default: 300)

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

// Re-exports
pub use config::ApiConfig;
pub use error::ApiError;
pub use routes::{app_router, AppState};
