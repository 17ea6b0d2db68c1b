//! Transport seam and its reqwest implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::errors::ClientError;
use crate::http::request::{ApiRequest, ApiResponse};

/// Sends one request and returns whatever the server answered.
///
/// Only a missing response (connect, timeout, broken body) is an `Err`;
/// HTTP failure statuses come back as `Ok` so the session guard sees them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// Transport backed by a pooled reqwest client
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Url::parse(base_url)?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ClientError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.url_for(&request)?;

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(ApiResponse::new(status, body))
    }
}
