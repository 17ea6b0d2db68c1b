//! Transport-neutral request and response values

use http::{HeaderMap, Method, StatusCode};
use openapi_client::models::ErrorResponse;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::ClientError;

/// An outbound call, before or after augmentation
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the backend base URL, always starting with `/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, ClientError> {
        self.body = Some(
            serde_json::to_value(body).map_err(|e| ClientError::Internal(e.to_string()))?,
        );
        Ok(self)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Whatever the server answered, success or not
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ClientError::Malformed(format!("{} response body: {}", self.status, e))
        })
    }

    /// Structured failure payload, if the body is one
    pub fn error_payload(&self) -> Option<ErrorResponse> {
        serde_json::from_str(&self.body).ok()
    }

    /// `error`, then `message`, then the reason phrase
    pub fn failure_message(&self) -> String {
        self.error_payload()
            .and_then(|p| {
                p.error
                    .filter(|e| !e.trim().is_empty())
                    .or(p.message.filter(|m| !m.trim().is_empty()))
            })
            .unwrap_or_else(|| {
                self.status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            })
    }
}
