//! Login, registration and logout
//!
//! The only writer of a fresh session. Everything here talks to `/auth/*`,
//! which the session guard leaves alone, so a wrong password surfaces as a
//! plain error instead of a logout.

use std::sync::Arc;

use openapi_client::models::{
    LoginRequest, PasswordResetRequest, RegisterRequest, ResetPasswordRequest, VerifyEmailRequest,
};
use tracing::{info, warn};

use crate::authn::access_token::AccessToken;
use crate::authn::session::Session;
use crate::cache::deployment::DeploymentCache;
use crate::errors::ClientError;
use crate::http::client::HttpClient;

pub struct AuthFlow {
    client: Arc<HttpClient>,
    cache: DeploymentCache,
}

impl AuthFlow {
    pub fn new(client: Arc<HttpClient>, cache: DeploymentCache) -> Self {
        Self { client, cache }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let email = require("Email", email)?;
        if password.is_empty() {
            return Err(ClientError::Validation("Password is required".to_string()));
        }

        let response = self
            .client
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        let token = response.resolved_token().ok_or_else(|| ClientError::Api {
            status: 200,
            message: "Login succeeded but no token was returned".to_string(),
        })?;

        let user_id = response
            .user_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| user_id_from_token(token));

        let session = self.client.credentials().set(token, user_id.as_deref()).await?;
        self.client.guard().rearm();

        info!(user_id = ?session.user_id(), "Logged in");
        Ok(session)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), ClientError> {
        let request = RegisterRequest {
            name: require("Name", name)?.to_string(),
            email: require("Email", email)?.to_string(),
            password: password.to_string(),
        };
        self.client.register(&request).await?;
        info!(email = %request.email, "Registered, verification code sent");
        Ok(())
    }

    /// Confirm the emailed code, then sign in with the same credentials.
    pub async fn verify_email(&self, email: &str, otp: &str, password: &str) -> Result<Session, ClientError> {
        let request = VerifyEmailRequest {
            email: require("Email", email)?.to_string(),
            otp: require("Verification code", otp)?.to_string(),
        };
        self.client.verify_email(&request).await?;
        info!(email = %request.email, "Email verified");

        self.login(&request.email, password).await
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), ClientError> {
        let request = PasswordResetRequest {
            email: require("Email", email)?.to_string(),
        };
        self.client.request_password_reset(&request).await
    }

    pub async fn reset_password(&self, email: &str, otp: &str, new_password: &str) -> Result<(), ClientError> {
        if new_password.is_empty() {
            return Err(ClientError::Validation("New password is required".to_string()));
        }
        let request = ResetPasswordRequest {
            email: require("Email", email)?.to_string(),
            otp: require("Verification code", otp)?.to_string(),
            new_password: new_password.to_string(),
        };
        self.client.reset_password(&request).await
    }

    /// Drop the session and everything fetched under it.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.client.credentials().clear().await?;
        self.cache.clear();
        info!("Logged out");
        Ok(())
    }

    /// Session to resume with. A stored JWT that has already expired is
    /// discarded; opaque tokens are kept and left to the backend.
    pub async fn restore(&self) -> Result<Session, ClientError> {
        let session = self.client.credentials().get();
        let Some(token) = session.token() else {
            return Ok(session);
        };

        match AccessToken::decode(token) {
            Ok(decoded) if decoded.is_expired() => {
                warn!(expired_at = ?decoded.expires_at(), "Stored session has expired");
                self.client.credentials().clear().await?;
                Ok(Session::anonymous())
            }
            _ => Ok(session),
        }
    }
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, ClientError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClientError::Validation(format!("{} is required", field)));
    }
    Ok(value)
}

fn user_id_from_token(token: &str) -> Option<String> {
    AccessToken::decode(token)
        .ok()
        .and_then(|t| t.user_id().map(str::to_string))
}
