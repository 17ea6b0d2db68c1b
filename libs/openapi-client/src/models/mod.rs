//! API models
//!
//! Field names follow the gateway's JSON spelling; conversion into client
//! domain types happens in the client crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Deployment as returned by `GET /deploys` and `GET /deploys/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub last_commit_hash: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Build log line as returned by `GET /deploys/{id}/logs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryInfo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /deploys`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub repo_url: String,
    pub project_name: String,
    pub branch: String,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

/// Response of `POST /deploys`; the gateway has shipped all three id spellings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

impl CreateDeploymentResponse {
    /// First non-empty id field
    pub fn resolved_id(&self) -> Option<&str> {
        [&self.id, &self.deployment_id, &self.upload_id]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.trim().is_empty())
    }
}

/// Branch object form of `GET /deploys/branches`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    #[serde(default)]
    pub commit: Option<CommitInfo>,
}

/// Commit reference attached to a branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of `POST /auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response of `POST /auth/login`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl LoginResponse {
    /// Token under whichever key the gateway used
    pub fn resolved_token(&self) -> Option<&str> {
        [&self.access_token, &self.token, &self.jwt]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.trim().is_empty())
    }
}

/// Body of `POST /auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/verify-email`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub otp: String,
}

/// Body of `POST /auth/request-password-reset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Body of `POST /auth/reset-password`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

/// Error response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
