//! Client configuration options

use std::time::Duration;

use crate::cache::deployment::CacheOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::poller;

/// Main client options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Gateway base URL
    pub backend_base_url: String,

    /// Gateway prefix of the deployment service
    pub api_prefix: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Where an expired session is sent
    pub login_path: String,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Deployment cache tuning
    pub cache: CacheOptions,

    /// Log tail options
    pub poller: poller::Options,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StorageLayout::default())
    }
}

impl ClientOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            backend_base_url: settings.backend.base_url.clone(),
            api_prefix: settings.backend.api_prefix.clone(),
            request_timeout: Duration::from_secs(settings.backend.request_timeout_secs),
            login_path: settings.login_path.clone(),
            layout,
            cache: CacheOptions {
                stale_after: Duration::from_secs(settings.cache.stale_after_secs),
                idle_ttl: Duration::from_secs(settings.cache.idle_ttl_secs),
                capacity: settings.cache.capacity.max(1),
            },
            poller: poller::Options {
                log_interval: Duration::from_millis(settings.polling.log_interval_ms),
                record_interval: Duration::from_millis(settings.polling.record_interval_ms),
                ..Default::default()
            },
        }
    }
}
