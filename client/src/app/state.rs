//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::ClientOptions;
use crate::authn::credentials::CredentialStore;
use crate::authn::flow::AuthFlow;
use crate::cache::deployment::DeploymentCache;
use crate::errors::ClientError;
use crate::http::client::HttpClient;
use crate::http::deployments::DeploymentApi;
use crate::http::guard::{SessionGuard, TeardownHook};
use crate::http::navigator::InMemoryNavigator;
use crate::http::transport::{ReqwestTransport, Transport};
use crate::workers::mutations::MutationCoordinator;
use crate::workers::poller::StatusPoller;

/// Location the front end is at while showing deployments
pub const DEPLOYMENTS_LOCATION: &str = "/deployments";

/// Everything that issues requests, wired to one credential store and one
/// cache
pub struct AppState {
    /// Current session
    pub credentials: Arc<CredentialStore>,

    /// Records session-expiry redirects
    pub navigator: Arc<InMemoryNavigator>,

    /// Logout-on-401 interceptor
    pub guard: Arc<SessionGuard>,

    /// HTTP client for backend communication
    pub http_client: Arc<HttpClient>,

    /// Shared deployment cache
    pub cache: DeploymentCache,

    /// Log tails
    pub poller: Arc<StatusPoller>,

    /// Rebuild, cancel, delete and create
    pub mutations: Arc<MutationCoordinator>,

    /// Login, registration and logout
    pub auth: Arc<AuthFlow>,

    /// Registered with the guard; kept here so the guard's weak hold stays live
    _session_reset: Arc<dyn TeardownHook>,
}

/// Drops everything the expired session fetched: no record or tail of the
/// previous user may be shown to the next one.
struct SessionReset {
    cache: DeploymentCache,
    poller: Arc<StatusPoller>,
}

impl TeardownHook for SessionReset {
    fn session_torn_down(&self) {
        self.poller.stop_all();
        self.cache.clear();
        info!("Discarded cached deployments of the expired session");
    }
}

impl AppState {
    /// Initialize application state from disk and the configured gateway
    pub async fn init(options: &ClientOptions) -> Result<Self, ClientError> {
        info!("Initializing client state...");

        let credentials = Arc::new(
            CredentialStore::load(Arc::new(options.layout.credentials_file())).await?,
        );
        let transport = Arc::new(ReqwestTransport::new(
            &options.backend_base_url,
            options.request_timeout,
        )?);

        let state = Self::assemble(options, credentials, transport);
        state.auth.restore().await?;
        Ok(state)
    }

    /// Wire the components around an existing store and transport
    pub fn assemble(
        options: &ClientOptions,
        credentials: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let navigator = Arc::new(InMemoryNavigator::new(DEPLOYMENTS_LOCATION));
        let guard = Arc::new(SessionGuard::new(
            credentials.clone(),
            navigator.clone(),
            options.login_path.clone(),
        ));

        let http_client = Arc::new(HttpClient::new(
            transport,
            credentials.clone(),
            guard.clone(),
            &options.api_prefix,
        ));
        let api: Arc<dyn DeploymentApi> = http_client.clone();

        let cache = DeploymentCache::new(api.clone(), options.cache.clone());
        let poller = Arc::new(StatusPoller::new(cache.clone(), options.poller.clone()));
        let mutations = Arc::new(MutationCoordinator::new(api, cache.clone()));
        let auth = Arc::new(AuthFlow::new(http_client.clone(), cache.clone()));

        let session_reset: Arc<dyn TeardownHook> = Arc::new(SessionReset {
            cache: cache.clone(),
            poller: poller.clone(),
        });
        guard.register_hook(&session_reset);

        Self {
            credentials,
            navigator,
            guard,
            http_client,
            cache,
            poller,
            mutations,
            auth,
            _session_reset: session_reset,
        }
    }

    /// Whether the session guard sent the user back to login
    pub fn session_expired(&self) -> bool {
        self.navigator.last_redirect().is_some()
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        self.poller.stop_all();
        self.auth.logout().await
    }

    /// Shutdown application state
    pub async fn shutdown(&self) {
        info!("Shutting down client state...");
        self.poller.shutdown().await;
    }
}
