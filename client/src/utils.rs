//! Version metadata and poll back-off

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `jsd --version` prints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub package: String,
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        package: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("JSD_GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("JSD_BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Delay growth after consecutive poll failures
///
/// The first failure waits `base`, each further one doubles it, never
/// beyond `cap`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub factor: f64,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            factor: 2.0,
        }
    }

    /// Delay to wait after `failures` failures in a row; zero failures means
    /// the plain `base`.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }
}
