//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also write logs to daily files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Deployment cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Log tail configuration
    #[serde(default)]
    pub polling: PollingSettings,

    /// Where an expired session is sent
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

fn default_login_path() -> String {
    "/login".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            backend: BackendSettings::default(),
            cache: CacheSettings::default(),
            polling: PollingSettings::default(),
            login_path: default_login_path(),
        }
    }
}

/// Backend API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Gateway base URL
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Gateway prefix of the deployment service
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_prefix() -> String {
    "/jsd".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Deployment cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Age after which a cached deployment is re-fetched on read
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Unwatched entries are evicted after this long
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// Maximum cached deployments
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_stale_after() -> u64 {
    300
}

fn default_idle_ttl() -> u64 {
    600
}

fn default_capacity() -> usize {
    100
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
            idle_ttl_secs: default_idle_ttl(),
            capacity: default_capacity(),
        }
    }
}

/// Log tail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Log re-fetch interval while building
    #[serde(default = "default_interval_ms")]
    pub log_interval_ms: u64,

    /// Record re-fetch interval while queued
    #[serde(default = "default_interval_ms")]
    pub record_interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    2000
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            log_interval_ms: default_interval_ms(),
            record_interval_ms: default_interval_ms(),
        }
    }
}
