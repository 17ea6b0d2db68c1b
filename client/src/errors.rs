//! Error types for the deployment client

use thiserror::Error;

/// Coarse error category a view uses to pick its feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session was torn down; the caller is being sent to login.
    Authorization,
    /// No usable response (connectivity, not-found or malformed data).
    Transport,
    /// The backend rejected the request with a readable reason.
    Business,
    /// Local storage or configuration failure.
    Local,
}

/// Main error type for the deployment client
///
/// Payloads are plain strings so one coalesced fetch result can be cloned
/// out to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Unauthorized(_) => ErrorKind::Authorization,
            ClientError::Network(_) | ClientError::Malformed(_) | ClientError::NotFound(_) => {
                ErrorKind::Transport
            }
            ClientError::Api { .. } | ClientError::Validation(_) => ErrorKind::Business,
            ClientError::StorageError(_)
            | ClientError::ConfigError(_)
            | ClientError::Internal(_) => ErrorKind::Local,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Text a view can show as-is.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Authorization => "Session expired. Please log in again.".to_string(),
            ErrorKind::Transport => "Connection failed. Server might be down.".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Malformed(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::ConfigError(err.to_string())
    }
}
