//! Session guard: global logout on authorization failure

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use http::StatusCode;
use tracing::{error, warn};

use crate::authn::credentials::CredentialStore;
use crate::errors::ClientError;
use crate::http::navigator::Navigator;
use crate::http::request::{ApiRequest, ApiResponse};

/// Failure text the gateway uses for a rejected token, whatever the status
pub const INVALID_TOKEN_ERROR: &str = "Invalid Access Token";

/// Login, registration, verification and password reset live here; a
/// failure on them is never a session expiry.
pub const AUTH_PATH_PREFIX: &str = "/auth/";

/// State that belongs to a session and must not outlive it
pub trait TeardownHook: Send + Sync {
    fn session_torn_down(&self);
}

/// Inspects every response exactly once.
///
/// On an authorization failure of a non-authentication call it clears the
/// credential store, runs the registered teardown hooks and hard-redirects
/// to the login entry point, then hands the failure back to the caller
/// anyway.
pub struct SessionGuard {
    credentials: Arc<CredentialStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    redirect_pending: AtomicBool,
    hooks: Mutex<Vec<Weak<dyn TeardownHook>>>,
}

impl SessionGuard {
    pub fn new(
        credentials: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            navigator,
            login_path: login_path.into(),
            redirect_pending: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Run `hook` on every teardown for as long as it is alive elsewhere.
    /// Held weakly: the hook's owner usually reaches back to this guard
    /// through the HTTP client.
    pub fn register_hook(&self, hook: &Arc<dyn TeardownHook>) {
        self.lock_hooks().push(Arc::downgrade(hook));
    }

    fn lock_hooks(&self) -> std::sync::MutexGuard<'_, Vec<Weak<dyn TeardownHook>>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_hooks(&self) {
        let live: Vec<Arc<dyn TeardownHook>> = {
            let mut hooks = self.lock_hooks();
            hooks.retain(|hook| hook.strong_count() > 0);
            hooks.iter().filter_map(Weak::upgrade).collect()
        };
        for hook in live {
            hook.session_torn_down();
        }
    }

    pub fn is_auth_request(request: &ApiRequest) -> bool {
        request.path.starts_with(AUTH_PATH_PREFIX)
    }

    pub fn is_authorization_failure(response: &ApiResponse) -> bool {
        if response.status == StatusCode::UNAUTHORIZED {
            return true;
        }
        response
            .error_payload()
            .and_then(|p| p.error)
            .is_some_and(|e| e == INVALID_TOKEN_ERROR)
    }

    /// Turn a transport outcome into the caller's result, tearing the
    /// session down first when needed.
    pub async fn inspect(
        &self,
        request: &ApiRequest,
        outcome: Result<ApiResponse, ClientError>,
    ) -> Result<ApiResponse, ClientError> {
        let response = outcome?;
        if response.is_success() {
            return Ok(response);
        }

        let message = response.failure_message();

        if Self::is_authorization_failure(&response) && !Self::is_auth_request(request) {
            self.teardown().await;
            return Err(ClientError::Unauthorized(message));
        }

        if response.status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(message));
        }

        Err(ClientError::Api {
            status: response.status.as_u16(),
            message,
        })
    }

    /// Whether a redirect has been issued and not yet re-armed
    pub fn redirect_pending(&self) -> bool {
        self.redirect_pending.load(Ordering::SeqCst)
    }

    /// Allow the next authorization failure to tear down again; called once
    /// a fresh session has been stored.
    pub fn rearm(&self) {
        self.redirect_pending.store(false, Ordering::SeqCst);
    }

    async fn teardown(&self) {
        if self
            .redirect_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        warn!("Session expired. Logging out...");

        if let Err(e) = self.credentials.clear().await {
            error!("Failed to remove persisted credentials: {}", e);
        }
        self.run_hooks();

        if self.navigator.current_location() == self.login_path {
            self.redirect_pending.store(false, Ordering::SeqCst);
            return;
        }

        self.navigator.hard_redirect(&self.login_path);
    }
}
