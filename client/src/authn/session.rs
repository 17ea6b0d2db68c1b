//! Session data held by the credential store

use secrecy::{ExposeSecret, SecretString};

/// Values browsers and older builds left behind in place of a real credential
const PLACEHOLDERS: [&str; 2] = ["undefined", "null"];

/// Trim, drop quote characters and reject placeholder values.
pub fn sanitize_credential(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || PLACEHOLDERS.contains(&cleaned) {
        return None;
    }
    Some(cleaned.to_string())
}

/// The current token and user id. Both are optional and always normalized.
#[derive(Debug, Default)]
pub struct Session {
    token: Option<SecretString>,
    user_id: Option<String>,
}

impl Session {
    /// A user id without a token is meaningless and is dropped.
    pub fn new(token: Option<&str>, user_id: Option<&str>) -> Self {
        let Some(token) = token.and_then(sanitize_credential) else {
            return Self::anonymous();
        };
        Self {
            token: Some(SecretString::from(token)),
            user_id: user_id.and_then(sanitize_credential),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            token: self
                .token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string())),
            user_id: self.user_id.clone(),
        }
    }
}
