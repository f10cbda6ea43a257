//! Configuration types for supabase-backend.

use std::env;
use std::time::Duration;

use mecanica_core::Collection;
use thiserror::Error;

use crate::realtime::ReconnectConfig;

/// Environment variable holding the backend endpoint URL.
pub const URL_VAR: &str = "MECANICA_SUPABASE_URL";
/// Environment variable holding the public API key.
pub const ANON_KEY_VAR: &str = "MECANICA_SUPABASE_ANON_KEY";
/// Environment variable overriding the change-feed endpoint.
pub const REALTIME_URL_VAR: &str = "MECANICA_REALTIME_URL";
/// Environment variable capping consecutive change-feed reconnects.
pub const REALTIME_MAX_ATTEMPTS_VAR: &str = "MECANICA_REALTIME_MAX_ATTEMPTS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors. These are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Configuration for connecting to the hosted backend.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base URL (e.g., "https://xyz.supabase.co").
    pub url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// Server-sent change feed endpoint. Defaults to `{url}/realtime/v1/sse`.
    pub realtime_url: Option<String>,
    /// Timeout for request/response calls (not applied to the change feed).
    pub timeout: Duration,
    /// Reconnection policy of change feeds.
    pub reconnect: ReconnectConfig,
}

impl SupabaseConfig {
    /// Create a configuration, validating the URL.
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into().trim().trim_end_matches('/').to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url));
        }

        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(ConfigError::Missing(ANON_KEY_VAR));
        }

        Ok(Self {
            url,
            anon_key,
            realtime_url: None,
            timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        })
    }

    /// Override the change-feed endpoint.
    pub fn with_realtime_url(mut self, realtime_url: impl Into<String>) -> Self {
        self.realtime_url = Some(realtime_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the change-feed reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `MECANICA_SUPABASE_URL` | Backend endpoint URL | (required) |
    /// | `MECANICA_SUPABASE_ANON_KEY` | Public API key | (required) |
    /// | `MECANICA_REALTIME_URL` | Change-feed endpoint | `{url}/realtime/v1/sse` |
    /// | `MECANICA_REALTIME_MAX_ATTEMPTS` | Reconnects before a feed gives up | unlimited |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(URL_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(URL_VAR))?;
        let anon_key = lookup(ANON_KEY_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ANON_KEY_VAR))?;

        let mut config = Self::new(url, anon_key)?;
        if let Some(realtime_url) = lookup(REALTIME_URL_VAR).filter(|v| !v.trim().is_empty()) {
            config = config.with_realtime_url(realtime_url);
        }
        if let Some(value) = lookup(REALTIME_MAX_ATTEMPTS_VAR).filter(|v| !v.trim().is_empty()) {
            let max_attempts = value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: REALTIME_MAX_ATTEMPTS_VAR,
                value: value.clone(),
            })?;
            config.reconnect.max_attempts = Some(max_attempts);
        }
        Ok(config)
    }

    /// REST endpoint of a collection.
    pub fn rest_url(&self, collection: Collection) -> String {
        format!("{}/rest/v1/{}", self.url, collection.table_name())
    }

    /// Auth endpoint for the given path (e.g., "token", "logout").
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    /// Upload endpoint of an object.
    pub fn storage_upload_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.url, bucket, encode_path(path))
    }

    /// Public URL of an uploaded object.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.url,
            bucket,
            encode_path(path)
        )
    }

    /// Change-feed endpoint for a collection.
    pub fn realtime_events_url(&self, collection: Collection) -> String {
        let base = self
            .realtime_url
            .clone()
            .unwrap_or_else(|| format!("{}/realtime/v1/sse", self.url));
        format!("{}?table={}", base, collection.table_name())
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
