//! Authentication endpoints
//!
//! These paths sit outside the deployment namespace: no credential is
//! attached and the session guard never tears down on their failures.

use openapi_client::models::{
    LoginRequest, LoginResponse, PasswordResetRequest, RegisterRequest, ResetPasswordRequest,
    VerifyEmailRequest,
};

use crate::errors::ClientError;
use crate::http::client::HttpClient;

impl HttpClient {
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError> {
        self.post("/auth/login", request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        self.post_unit("/auth/register", Some(request)).await
    }

    pub async fn verify_email(&self, request: &VerifyEmailRequest) -> Result<(), ClientError> {
        self.post_unit("/auth/verify-email", Some(request)).await
    }

    pub async fn request_password_reset(&self, request: &PasswordResetRequest) -> Result<(), ClientError> {
        self.post_unit("/auth/request-password-reset", Some(request)).await
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> Result<(), ClientError> {
        self.post_unit("/auth/reset-password", Some(request)).await
    }
}
