//! # Sync Settings
//!
//! Tunables of the engine. Loaded as the `[sync]` table of the server
//! config file; every field has a default.
//!
//! ```toml
//! [sync]
//! max_page_limit = 5000
//! max_operation_retries = 3
//! session_timeout_secs = 3600
//! sweep_interval_secs = 300
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Engine behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Upper bound on a differential-sync page. Larger requests are clamped.
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,

    /// Re-submissions of a conflicted or failed operation before it is
    /// dead-lettered.
    #[serde(default = "default_max_operation_retries")]
    pub max_operation_retries: i64,

    /// Sessions active for longer than this are failed by the sweeper.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Interval between stale session sweeps. 0 disables the sweeper.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_max_page_limit() -> u32 {
    binaa_core::MAX_PAGE_LIMIT
}

fn default_max_operation_retries() -> i64 {
    binaa_core::DEFAULT_MAX_OPERATION_RETRIES
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_page_limit: default_max_page_limit(),
            max_operation_retries: default_max_operation_retries(),
            session_timeout_secs: default_session_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl SyncSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_page_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "max_page_limit must be at least 1".into(),
            ));
        }
        if self.max_operation_retries < 0 {
            return Err(SyncError::InvalidConfig(
                "max_operation_retries must not be negative".into(),
            ));
        }
        if self.session_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "session_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_page_limit, 5_000);
        assert_eq!(settings.max_operation_retries, 3);
        assert_eq!(settings.session_timeout(), Duration::from_secs(3600));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{ "max_operation_retries": 5, "sweep_interval_secs": 0 }"#)
                .unwrap();
        assert_eq!(settings.max_operation_retries, 5);
        assert_eq!(settings.max_page_limit, 5_000);
        assert_eq!(settings.sweep_interval(), None);
    }

    #[test]
    fn test_validate_rejects_zero_page_limit() {
        let settings = SyncSettings {
            max_page_limit: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(SyncError::InvalidConfig(_))));
    }
}
