//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

/// Default number of activity-log entries kept in the store.
pub const DEFAULT_ACTIVITY_LOG_LIMIT: usize = 20;
/// Default bucket for chat attachments.
pub const DEFAULT_ATTACHMENT_BUCKET: &str = "chat-attachments";

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Newest activity-log entries fetched on refresh and kept after merges.
    pub activity_log_limit: usize,
    /// Upper bound on how long the session tracker reports `loading`.
    pub auth_failsafe: Duration,
    /// Lifetime of a notification before it should be dismissed.
    pub notification_ttl: Duration,
    /// Storage bucket for chat attachments.
    pub attachment_bucket: String,
    /// Timeout for auxiliary lookups made while merging realtime events.
    pub lookup_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            activity_log_limit: DEFAULT_ACTIVITY_LOG_LIMIT,
            auth_failsafe: Duration::from_secs(8),
            notification_ttl: Duration::from_secs(3),
            attachment_bucket: DEFAULT_ATTACHMENT_BUCKET.to_string(),
            lookup_timeout: Duration::from_millis(2000),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `MECANICA_ACTIVITY_LOG_LIMIT` | Activity-log entries kept | `20` |
    /// | `MECANICA_AUTH_FAILSAFE_SECS` | Loading fail-safe, seconds | `8` |
    /// | `MECANICA_NOTIFICATION_TTL_SECS` | Notification lifetime, seconds | `3` |
    /// | `MECANICA_ATTACHMENT_BUCKET` | Attachment bucket | `chat-attachments` |
    /// | `MECANICA_LOOKUP_TIMEOUT_MS` | Realtime lookup timeout, ms | `2000` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var).filter(|v| !v.trim().is_empty()) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { var, value }),
                None => Ok(None),
            }
        };

        let activity_log_limit = match number("MECANICA_ACTIVITY_LOG_LIMIT")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "MECANICA_ACTIVITY_LOG_LIMIT",
                    value: "0".to_string(),
                })
            }
            Some(n) => n as usize,
            None => defaults.activity_log_limit,
        };

        Ok(Self {
            activity_log_limit,
            auth_failsafe: number("MECANICA_AUTH_FAILSAFE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.auth_failsafe),
            notification_ttl: number("MECANICA_NOTIFICATION_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.notification_ttl),
            attachment_bucket: lookup("MECANICA_ATTACHMENT_BUCKET")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.attachment_bucket),
            lookup_timeout: number("MECANICA_LOOKUP_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.lookup_timeout),
        })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}
