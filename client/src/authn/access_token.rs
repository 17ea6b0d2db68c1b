//! Access token inspection

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

/// Claims the gateway puts in its access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject
    #[serde(default)]
    pub sub: Option<String>,

    /// User id, when the gateway includes it explicitly
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,

    /// Expiration timestamp
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: Option<i64>,
}

/// A decoded access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub claims: AccessTokenClaims,
}

impl AccessToken {
    /// Read the claims of a JWT.
    /// Note: the signature is NOT checked; the gateway does that on every call.
    pub fn decode(raw: &str) -> Result<Self, ClientError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data = decode::<AccessTokenClaims>(raw, &DecodingKey::from_secret(b""), &validation)
            .map_err(|e| ClientError::Validation(format!("Failed to decode token: {}", e)))?;

        Ok(Self {
            claims: token_data.claims,
        })
    }

    /// Identity to send alongside the token: `userId`, else `sub`
    pub fn user_id(&self) -> Option<&str> {
        self.claims
            .user_id
            .as_deref()
            .or(self.claims.sub.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    /// Tokens without `exp` never expire client-side.
    pub fn is_expired(&self) -> bool {
        self.claims
            .exp
            .map(|exp| exp < Utc::now().timestamp())
            .unwrap_or(false)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims
            .exp
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}
