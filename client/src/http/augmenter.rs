//! Attaches the session credential to deployment API calls

use http::header::{HeaderValue, AUTHORIZATION};
use tracing::warn;

use crate::authn::session::{sanitize_credential, Session};
use crate::http::request::ApiRequest;

/// Identity header the gateway forwards to the deployment service
pub const USER_ID_HEADER: &str = "x-user-id";

/// Pure, synchronous request rewrite applied right before transmission.
///
/// Requests under the deployment namespace get `Authorization: Bearer ...`
/// and the identity header; anything caller-supplied under those names is
/// replaced so a stale or placeholder value never leaves the process.
/// Requests outside the namespace pass through untouched.
#[derive(Debug, Clone)]
pub struct RequestAugmenter {
    namespace: String,
}

impl RequestAugmenter {
    /// `namespace` is a path prefix such as `/jsd/deploys`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn in_namespace(&self, path: &str) -> bool {
        match path.strip_prefix(self.namespace.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => false,
        }
    }

    pub fn augment(&self, mut request: ApiRequest, session: &Session) -> ApiRequest {
        if !self.in_namespace(&request.path) {
            return request;
        }

        request.headers.remove(AUTHORIZATION);
        request.headers.remove(USER_ID_HEADER);

        if let Some(token) = session.token().and_then(sanitize_credential) {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("Token is not a valid header value, sending without it"),
            }
        }

        if let Some(user_id) = session.user_id().and_then(sanitize_credential) {
            match HeaderValue::from_str(&user_id) {
                Ok(value) => {
                    request.headers.insert(USER_ID_HEADER, value);
                }
                Err(_) => warn!("User id is not a valid header value, sending without it"),
            }
        }

        request
    }
}
