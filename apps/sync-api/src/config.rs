//! Sync API configuration.
//!
//! Loaded from a TOML file, then overridden by `BINAA_*` environment
//! variables, then validated.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [database]
//! path = "/var/lib/binaa/sync.db"
//! max_connections = 10
//!
//! [auth]
//! jwt_secret = "..."
//! leeway_secs = 30
//!
//! [sync]
//! max_page_limit = 5000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use binaa_sync::{SyncError, SyncSettings};

/// Shortest accepted HS256 secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Sync API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Created on first start.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("org", "binaa", "field-sync")
        .map(|dirs| dirs.data_dir().join("sync.db"))
        .unwrap_or_else(|| PathBuf::from("binaa-sync.db"))
}

fn default_max_connections() -> u32 {
    10
}

/// Token verification. Tokens are issued by the identity service; this
/// server only checks them.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Shared HS256 secret. No default: must be configured.
    #[serde(default)]
    pub jwt_secret: String,

    /// Clock skew tolerated on `exp`.
    #[serde(default)]
    pub leeway_secs: u64,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ApiConfig {
    /// Loads the config file (explicit path or the platform default), applies
    /// environment overrides and validates the result.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => {
                info!(?path, "Loading sync API config from file");
                Self::from_file(&path)?
            }
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Applies `BINAA_*` overrides read through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(addr) = lookup("BINAA_BIND_ADDR") {
            debug!(addr = %addr, "Overriding bind address from environment");
            self.server.bind_addr = addr;
        }

        if let Some(path) = lookup("BINAA_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(secret) = lookup("BINAA_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        if let Some(value) = lookup("BINAA_MAX_CONNECTIONS") {
            self.database.max_connections = parse("BINAA_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("BINAA_MAX_PAGE_LIMIT") {
            self.sync.max_page_limit = parse("BINAA_MAX_PAGE_LIMIT", &value)?;
        }
        if let Some(value) = lookup("BINAA_MAX_OPERATION_RETRIES") {
            self.sync.max_operation_retries = parse("BINAA_MAX_OPERATION_RETRIES", &value)?;
        }
        if let Some(value) = lookup("BINAA_SESSION_TIMEOUT_SECS") {
            self.sync.session_timeout_secs = parse("BINAA_SESSION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("BINAA_SWEEP_INTERVAL_SECS") {
            self.sync.sweep_interval_secs = parse("BINAA_SWEEP_INTERVAL_SECS", &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired(
                "auth.jwt_secret (or BINAA_JWT_SECRET)".into(),
            ));
        }
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidValue(format!(
                "auth.jwt_secret must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "server.bind_addr: {}",
                self.server.bind_addr
            )));
        }
        if self.sync.sweep_interval().is_none() {
            warn!("Stale session sweeper is disabled");
        }
        self.sync.validate()?;
        Ok(())
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "binaa", "field-sync")
            .map(|dirs| dirs.config_dir().join("sync-api.toml"))
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}
