//! Deployment mutations and the cache bookkeeping that follows them

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use openapi_client::models::CreateDeploymentRequest;
use tracing::{info, warn};

use crate::cache::deployment::DeploymentCache;
use crate::errors::ClientError;
use crate::http::deployments::DeploymentApi;
use crate::models::deployment::{DeploymentStatus, DEFAULT_BRANCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Rebuild,
    Cancel,
    Delete,
}

impl Mutation {
    /// Whether the mutation makes sense for a deployment in `status`
    pub fn allowed_for(&self, status: &DeploymentStatus) -> bool {
        match self {
            Mutation::Cancel => !status.is_terminal(),
            Mutation::Rebuild | Mutation::Delete => status.is_terminal(),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Mutation::Rebuild => "rebuild",
            Mutation::Cancel => "cancel",
            Mutation::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// Input of a new deployment
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub repo_url: String,
    pub project_name: String,
    pub branch: Option<String>,
    pub secrets: BTreeMap<String, String>,
}

impl NewDeployment {
    fn into_request(self) -> Result<CreateDeploymentRequest, ClientError> {
        let repo_url = self.repo_url.trim().to_string();
        if repo_url.is_empty() {
            return Err(ClientError::Validation("Repository URL is required".to_string()));
        }
        let project_name = self.project_name.trim().to_string();
        if project_name.is_empty() {
            return Err(ClientError::Validation("Project name is required".to_string()));
        }

        let branch = self
            .branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let secrets = self
            .secrets
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        Ok(CreateDeploymentRequest {
            repo_url,
            project_name,
            branch,
            secrets,
        })
    }
}

/// Issues rebuild, cancel, delete and create, then brings the cache in line.
///
/// Nothing is changed optimistically: the cache is touched only after the
/// backend accepted the call, so a failure leaves it exactly as it was.
pub struct MutationCoordinator {
    api: Arc<dyn DeploymentApi>,
    cache: DeploymentCache,
}

impl MutationCoordinator {
    pub fn new(api: Arc<dyn DeploymentApi>, cache: DeploymentCache) -> Self {
        Self { api, cache }
    }

    /// Re-run a finished deployment. The status is left alone; the next poll
    /// observes QUEUED or BUILDING.
    pub async fn rebuild(&self, id: &str) -> Result<(), ClientError> {
        let id = self.check(id, Mutation::Rebuild)?;
        self.api.rebuild(id).await?;

        self.cache.invalidate(id);
        self.cache.invalidate_logs(id);
        self.cache.invalidate_list();
        info!(id, "Rebuild requested");
        Ok(())
    }

    pub async fn cancel(&self, id: &str) -> Result<(), ClientError> {
        let id = self.check(id, Mutation::Cancel)?;
        self.api.cancel(id).await?;

        self.cache.invalidate(id);
        self.cache.invalidate_list();
        info!(id, "Cancel requested");
        Ok(())
    }

    /// Views of `id` receive a removal event and should navigate away.
    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let id = self.check(id, Mutation::Delete)?;
        self.api.delete(id).await?;

        self.cache.remove(id);
        info!(id, "Deployment deleted");
        Ok(())
    }

    /// Returns the id of the new deployment.
    pub async fn create(&self, deployment: NewDeployment) -> Result<String, ClientError> {
        let request = deployment.into_request()?;
        let id = self.api.create_deployment(&request).await?;

        self.cache.invalidate_list();
        info!(id = %id, project = %request.project_name, "Deployment created");
        Ok(id)
    }

    pub async fn branches(&self, repo_url: &str) -> Result<Vec<String>, ClientError> {
        let repo_url = repo_url.trim();
        if repo_url.is_empty() {
            return Err(ClientError::Validation("Repository URL is required".to_string()));
        }
        self.api.list_branches(repo_url).await
    }

    /// Rejects a missing id, and a mutation the cached status already rules
    /// out. An uncached status is left for the backend to judge.
    fn check<'a>(&self, id: &'a str, mutation: Mutation) -> Result<&'a str, ClientError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ClientError::Validation(format!(
                "A deployment id is required to {}",
                mutation
            )));
        }

        let cached = self.cache.peek(id).and_then(|snapshot| snapshot.deployment);
        if let Some(deployment) = cached {
            if !mutation.allowed_for(&deployment.status) {
                warn!(id, status = %deployment.status, "Refusing to {} deployment", mutation);
                return Err(ClientError::Validation(format!(
                    "Cannot {} a deployment that is {}",
                    mutation,
                    deployment.status.label()
                )));
            }
        }
        Ok(id)
    }
}
