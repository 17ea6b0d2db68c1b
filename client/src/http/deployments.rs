//! Deployment API client

use async_trait::async_trait;
use openapi_client::models::{
    CreateDeploymentRequest, CreateDeploymentResponse, DeploymentInfo, LogEntryInfo,
};
use serde_json::Value;

use crate::errors::ClientError;
use crate::http::client::HttpClient;
use crate::http::request::ApiRequest;
use crate::models::branch::normalize_branches;
use crate::models::deployment::{sort_newest_first, Deployment, LogEntry};

/// Calls of the deployment service the cache and coordinator depend on
///
/// Kept as a trait so the cache, poller and coordinator can run against an
/// in-memory backend.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// All deployments of the current user, newest first
    async fn list_deployments(&self) -> Result<Vec<Deployment>, ClientError>;

    async fn get_deployment(&self, id: &str) -> Result<Deployment, ClientError>;

    /// Log lines in the order the backend produced them
    async fn get_logs(&self, id: &str) -> Result<Vec<LogEntry>, ClientError>;

    /// Returns the id of the new deployment
    async fn create_deployment(&self, request: &CreateDeploymentRequest) -> Result<String, ClientError>;

    async fn rebuild(&self, id: &str) -> Result<(), ClientError>;

    async fn cancel(&self, id: &str) -> Result<(), ClientError>;

    async fn delete(&self, id: &str) -> Result<(), ClientError>;

    async fn list_branches(&self, repo_url: &str) -> Result<Vec<String>, ClientError>;
}

#[async_trait]
impl DeploymentApi for HttpClient {
    async fn list_deployments(&self) -> Result<Vec<Deployment>, ClientError> {
        let payload: Value = self.get(ApiRequest::get(self.deploys_path(""))).await?;
        if !payload.is_array() {
            return Err(ClientError::Malformed("deployment list is not an array".to_string()));
        }

        let infos: Vec<DeploymentInfo> = serde_json::from_value(payload)?;
        let mut deployments = infos
            .into_iter()
            .map(Deployment::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        sort_newest_first(&mut deployments);
        Ok(deployments)
    }

    async fn get_deployment(&self, id: &str) -> Result<Deployment, ClientError> {
        let path = self.deployment_path(id, "")?;
        let payload: Value = self.get(ApiRequest::get(path)).await?;
        if !payload.is_object() {
            return Err(ClientError::Malformed(format!("deployment {} is not an object", id)));
        }

        let info: DeploymentInfo = serde_json::from_value(payload)?;
        Deployment::try_from(info)
    }

    async fn get_logs(&self, id: &str) -> Result<Vec<LogEntry>, ClientError> {
        let path = self.deployment_path(id, "/logs")?;
        let response = self.execute(ApiRequest::get(path)).await?;
        if response.body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let payload: Value = response.json()?;
        let infos: Vec<LogEntryInfo> = match payload {
            Value::Null => Vec::new(),
            Value::Array(_) => serde_json::from_value(payload)?,
            _ => return Err(ClientError::Malformed(format!("logs of {} are not an array", id))),
        };
        Ok(infos.into_iter().map(LogEntry::from).collect())
    }

    async fn create_deployment(&self, request: &CreateDeploymentRequest) -> Result<String, ClientError> {
        let response: CreateDeploymentResponse = self.post(&self.deploys_path(""), request).await?;
        response
            .resolved_id()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Malformed("create response carries no id".to_string()))
    }

    async fn rebuild(&self, id: &str) -> Result<(), ClientError> {
        let path = self.deployment_path(id, "/rebuild")?;
        self.post_unit::<Value>(&path, None).await
    }

    async fn cancel(&self, id: &str) -> Result<(), ClientError> {
        let path = self.deployment_path(id, "/cancel")?;
        self.post_unit::<Value>(&path, None).await
    }

    async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let path = self.deployment_path(id, "")?;
        self.delete_at(&path).await
    }

    async fn list_branches(&self, repo_url: &str) -> Result<Vec<String>, ClientError> {
        let request = ApiRequest::get(self.deploys_path("/branches")).with_query("repoUrl", repo_url);
        let payload: Value = self.get(request).await?;
        Ok(normalize_branches(payload))
    }
}
