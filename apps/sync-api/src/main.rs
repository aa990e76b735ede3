//! # Binaa Sync API
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load config ─► open SQLite + migrate ─► SyncEngine ─► sweeper         │
//! │       ─► serve HTTP until SIGINT/SIGTERM ─► stop sweeper ─► close pool │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use binaa_db::{Database, DbConfig};
use binaa_sync::SyncEngine;
use binaa_sync_api::{app_router, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,binaa_sync=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting Binaa sync API...");

    let config = ApiConfig::load(config_path_from_args()).context("loading configuration")?;
    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    if let Some(dir) = config.database.path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
        }
    }

    let db = Database::new(
        DbConfig::new(&config.database.path).max_connections(config.database.max_connections),
    )
    .await
    .context("opening database")?;
    info!("Database ready");

    let engine = SyncEngine::new(db.clone(), config.sync.clone()).context("building sync engine")?;
    let sweeper = engine.start_sweeper();

    let router = app_router(AppState::new(db.clone(), engine, &config.auth));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Sync API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.shutdown().await {
            warn!(error = %e, "Session sweeper already stopped");
        }
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// `--config <path>` from the command line, if given.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
