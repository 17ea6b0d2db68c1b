//! HTTP client implementation

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::authn::credentials::CredentialStore;
use crate::errors::ClientError;
use crate::http::augmenter::RequestAugmenter;
use crate::http::guard::SessionGuard;
use crate::http::request::{ApiRequest, ApiResponse};
use crate::http::transport::Transport;

/// HTTP client for backend communication
///
/// Every call goes through the same pipeline: augment with the current
/// session, send, let the session guard inspect the outcome.
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    guard: Arc<SessionGuard>,
    augmenter: RequestAugmenter,
    api_prefix: String,
}

impl HttpClient {
    /// `api_prefix` is the gateway prefix of the deployment service, e.g. `/jsd`.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        guard: Arc<SessionGuard>,
        api_prefix: &str,
    ) -> Self {
        let api_prefix = api_prefix.trim_end_matches('/').to_string();
        Self {
            transport,
            credentials,
            guard,
            augmenter: RequestAugmenter::new(format!("{}/deploys", api_prefix)),
            api_prefix,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    /// `/jsd/deploys` followed by `suffix`
    pub fn deploys_path(&self, suffix: &str) -> String {
        format!("{}/deploys{}", self.api_prefix, suffix)
    }

    /// `/jsd/deploys/<id>` followed by `suffix`. The id always stays a single
    /// path segment: separators and query characters are percent-encoded, and
    /// dot segments are refused since URL parsing would collapse them.
    pub fn deployment_path(&self, id: &str, suffix: &str) -> Result<String, ClientError> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(ClientError::Validation(format!("Invalid deployment id '{}'", id)));
        }
        Ok(self.deploys_path(&format!("/{}{}", encode_segment(id), suffix)))
    }

    /// Run one request through augmentation, transport and the guard.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let request = self.augmenter.augment(request, &self.credentials.get());
        let request_id = Uuid::new_v4();
        debug!(%request_id, "{} {}", request.method, request.path);

        let outcome = self.transport.send(request.clone()).await;
        let result = self.guard.inspect(&request, outcome).await;

        if let Err(e) = &result {
            error!(%request_id, "HTTP {} {} failed: {}", request.method, request.path, e);
        }
        result
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        self.execute(request).await?.json()
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let request = ApiRequest::post(path).with_json(body)?;
        self.execute(request).await?.json()
    }

    /// POST whose answer is only success or failure
    pub async fn post_unit<B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<(), ClientError> {
        let mut request = ApiRequest::post(path);
        if let Some(body) = body {
            request = request.with_json(body)?;
        }
        self.execute(request).await.map(|_| ())
    }

    /// Make a DELETE request
    pub async fn delete_at(&self, path: &str) -> Result<(), ClientError> {
        self.execute(ApiRequest::delete(path)).await.map(|_| ())
    }
}

/// Percent-encode everything but unreserved characters. Spaces become `%20`;
/// a literal `+` was already encoded as `%2B`, so the swap is unambiguous.
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
