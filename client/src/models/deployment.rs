//! Deployment models

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use openapi_client::models::{DeploymentInfo, LogEntryInfo};

use crate::errors::ClientError;

/// Branch used when the backend leaves it blank
pub const DEFAULT_BRANCH: &str = "main";

/// Shown instead of a log time when the backend sent none
pub const MISSING_TIME_PLACEHOLDER: &str = "--:--:--";

/// Build status reported by the backend
///
/// Values outside the known set are kept as `Unknown` instead of failing the
/// whole response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeploymentStatus {
    Queued,
    Building,
    Ready,
    Failed,
    Cancelled,
    TimedOut,
    Unknown(String),
}

impl DeploymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => DeploymentStatus::Queued,
            "BUILDING" => DeploymentStatus::Building,
            "READY" => DeploymentStatus::Ready,
            "FAILED" => DeploymentStatus::Failed,
            "CANCELLED" => DeploymentStatus::Cancelled,
            "TIMED_OUT" => DeploymentStatus::TimedOut,
            _ => DeploymentStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Ready => "READY",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::Cancelled => "CANCELLED",
            DeploymentStatus::TimedOut => "TIMED_OUT",
            DeploymentStatus::Unknown(raw) => raw,
        }
    }

    /// Human label, `Unknown` for anything unrecognised
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "Queued",
            DeploymentStatus::Building => "Building",
            DeploymentStatus::Ready => "Ready",
            DeploymentStatus::Failed => "Failed",
            DeploymentStatus::Cancelled => "Cancelled",
            DeploymentStatus::TimedOut => "Timed Out",
            DeploymentStatus::Unknown(_) => "Unknown",
        }
    }

    /// Only QUEUED and BUILDING can still change on their own.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Queued | DeploymentStatus::Building)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for DeploymentStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DeploymentStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(DeploymentStatus::parse(&s))
    }
}

/// A deployment as held by the client cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub status: DeploymentStatus,
    pub repository_url: Option<String>,
    pub website_url: Option<String>,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Link for a READY deployment; the backend's `websiteUrl` wins.
    pub fn public_url(&self, base_url: &str) -> Option<String> {
        if let Some(url) = self.website_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Some(url.to_string());
        }
        if self.status != DeploymentStatus::Ready {
            return None;
        }
        Some(format!("{}/{}", base_url.trim_end_matches('/'), self.id))
    }
}

impl TryFrom<DeploymentInfo> for Deployment {
    type Error = ClientError;

    fn try_from(info: DeploymentInfo) -> Result<Self, Self::Error> {
        if info.id.trim().is_empty() {
            return Err(ClientError::Malformed("deployment without id".to_string()));
        }

        let created_at = info
            .created_at
            .as_deref()
            .and_then(parse_timestamp)
            .ok_or_else(|| {
                ClientError::Malformed(format!(
                    "deployment {} has no readable createdAt ({:?})",
                    info.id, info.created_at
                ))
            })?;

        let name = info
            .name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| info.repository_url.as_deref().and_then(name_from_repository_url))
            .unwrap_or_else(|| info.id.clone());

        let branch = info
            .branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        Ok(Self {
            status: info
                .status
                .as_deref()
                .map(DeploymentStatus::parse)
                .unwrap_or_else(|| DeploymentStatus::Unknown(String::new())),
            updated_at: info.updated_at.as_deref().and_then(parse_timestamp),
            id: info.id,
            name,
            repository_url: info.repository_url,
            website_url: info.website_url,
            branch,
            created_at,
        })
    }
}

/// `https://github.com/acme/shop.git` -> `shop`
pub fn name_from_repository_url(url: &str) -> Option<String> {
    let last = url
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()?
        .trim_end_matches(".git");
    if last.is_empty() || last.contains(':') {
        return None;
    }
    Some(last.to_string())
}

/// Accepts RFC 3339 as well as the zone-less `LocalDateTime` form, read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Newest first; equal creation times fall back to id order.
pub fn compare_newest_first(a: &Deployment, b: &Deployment) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_newest_first(deployments: &mut [Deployment]) {
    deployments.sort_by(compare_newest_first);
}

/// One line of build output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: i64,
    pub deployment_id: String,
    pub timestamp: Option<String>,
    pub content: String,
}

impl LogEntry {
    /// `HH:MM:SS` cut from the timestamp, or a fixed placeholder
    pub fn display_time(&self) -> &str {
        self.timestamp
            .as_deref()
            .and_then(|ts| ts.get(11..19))
            .unwrap_or(MISSING_TIME_PLACEHOLDER)
    }
}

impl From<LogEntryInfo> for LogEntry {
    fn from(info: LogEntryInfo) -> Self {
        Self {
            id: info.id,
            deployment_id: info.deployment_id,
            timestamp: info.timestamp.filter(|t| !t.trim().is_empty()),
            content: info.content,
        }
    }
}
