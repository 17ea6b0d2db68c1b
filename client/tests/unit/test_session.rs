//! Session tests over the full request pipeline

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use http::{Method, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use jsd_client::app::options::ClientOptions;
use jsd_client::app::state::AppState;
use jsd_client::authn::credentials::CredentialStore;
use jsd_client::errors::{ClientError, ErrorKind};
use jsd_client::filesys::file::File;
use jsd_client::http::augmenter::USER_ID_HEADER;
use jsd_client::storage::layout::StorageLayout;
use jsd_client::storage::settings::Settings;
use jsd_client::workers::poller::TailEvent;

use crate::support::FakeTransport;

struct Fixture {
    dir: PathBuf,
    transport: Arc<FakeTransport>,
    state: AppState,
}

impl Fixture {
    fn credentials_file(&self) -> File {
        StorageLayout::new(&self.dir).credentials_file()
    }
}

async fn fixture(token: Option<&str>, user_id: Option<&str>) -> Fixture {
    let dir = std::env::temp_dir().join(format!("jsd-session-{}", uuid::Uuid::new_v4()));
    let layout = StorageLayout::new(&dir);
    let options = ClientOptions::from_settings(&Settings::default(), layout.clone());

    let credentials = Arc::new(
        CredentialStore::load(Arc::new(layout.credentials_file()))
            .await
            .unwrap(),
    );
    if let Some(token) = token {
        credentials.set(token, user_id).await.unwrap();
    }

    let transport = FakeTransport::new();
    let state = AppState::assemble(&options, credentials, transport.clone());
    Fixture {
        dir,
        transport,
        state,
    }
}

fn deployment_body(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": "shop",
        "status": status,
        "repositoryUrl": "https://github.com/acme/shop",
        "createdAt": "2025-03-01T12:00:00Z"
    })
}

fn jwt(claims: serde_json::Value) -> String {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"gateway")).unwrap()
}

#[tokio::test]
async fn test_unauthorized_call_clears_both_keys() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    fixture.transport.respond(
        Method::GET,
        "/jsd/deploys/d1",
        StatusCode::UNAUTHORIZED,
        json!({"error": "Token expired"}),
    );

    let result = fixture.state.cache.get("d1").await;

    assert_eq!(result.unwrap_err(), ClientError::Unauthorized("Token expired".to_string()));
    let session = fixture.state.credentials.get();
    assert!(session.token().is_none());
    assert!(session.user_id().is_none());
    assert!(!fixture.credentials_file().exists().await);
    assert!(fixture.state.session_expired());
    assert_eq!(fixture.state.navigator.redirects(), vec!["/login".to_string()]);
}

#[tokio::test]
async fn test_failed_login_is_a_plain_error() {
    let fixture = fixture(None, None).await;
    fixture.transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::UNAUTHORIZED,
        json!({"error": "Invalid email or password"}),
    );

    let result = fixture.state.auth.login("ana@example.com", "wrong").await;

    let error = result.unwrap_err();
    assert_eq!(
        error,
        ClientError::Api {
            status: 401,
            message: "Invalid email or password".to_string()
        }
    );
    assert_eq!(error.kind(), ErrorKind::Business);
    assert!(fixture.state.navigator.redirects().is_empty());
    assert!(!fixture.state.guard.redirect_pending());
}

#[tokio::test]
async fn test_login_after_expiry_stores_session_and_rearms() {
    let fixture = fixture(Some("old"), Some("u1")).await;
    fixture.transport.respond(
        Method::GET,
        "/jsd/deploys",
        StatusCode::UNAUTHORIZED,
        json!({"error": "Token expired"}),
    );
    fixture.transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        json!({"accessToken": "fresh", "userId": "42"}),
    );

    assert!(fixture.state.cache.list().await.unwrap_err().is_unauthorized());
    assert!(fixture.state.guard.redirect_pending());

    let session = fixture.state.auth.login("ana@example.com", "secret").await.unwrap();

    assert_eq!(session.token(), Some("fresh"));
    assert_eq!(session.user_id(), Some("42"));
    assert!(!fixture.state.guard.redirect_pending());

    let stored: serde_json::Value = fixture.credentials_file().read_json().await.unwrap();
    assert_eq!(stored["jstratusd-token"], "fresh");
    assert_eq!(stored["jstratusd-userId"], "42");
}

#[tokio::test]
async fn test_login_reads_user_id_from_token() {
    let fixture = fixture(None, None).await;
    let token = jwt(json!({"sub": "ana@example.com"}));
    fixture.transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        json!({ "token": token }),
    );

    let session = fixture.state.auth.login("ana@example.com", "secret").await.unwrap();
    assert_eq!(session.user_id(), Some("ana@example.com"));
}

#[tokio::test]
async fn test_login_without_token_fails() {
    let fixture = fixture(None, None).await;
    fixture.transport.respond(Method::POST, "/auth/login", StatusCode::OK, json!({}));

    let result = fixture.state.auth.login("ana@example.com", "secret").await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Business);
    assert!(!fixture.state.credentials.get().is_authenticated());
}

#[tokio::test]
async fn test_deployment_calls_carry_credentials() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    fixture.transport.respond(
        Method::GET,
        "/jsd/deploys/d1",
        StatusCode::OK,
        deployment_body("d1", "BUILDING"),
    );
    fixture.transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        json!({"accessToken": "tok-2"}),
    );

    fixture.state.cache.get("d1").await.unwrap();
    let request = fixture.transport.last_request("/jsd/deploys/d1").unwrap();
    assert_eq!(request.header("authorization"), Some("Bearer tok-1"));
    assert_eq!(request.header(USER_ID_HEADER), Some("u1"));

    fixture.state.auth.login("ana@example.com", "secret").await.unwrap();
    let login = fixture.transport.last_request("/auth/login").unwrap();
    assert!(login.header("authorization").is_none());
    assert!(login.header(USER_ID_HEADER).is_none());
}

#[tokio::test]
async fn test_malformed_record_is_transport_failure() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    fixture
        .transport
        .respond(Method::GET, "/jsd/deploys/d1", StatusCode::OK, json!([]));

    let error = fixture.state.cache.get("d1").await.unwrap_err();

    assert!(matches!(error, ClientError::Malformed(_)));
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(fixture.state.cache.peek("d1").unwrap().deployment.is_none());
    assert!(fixture.state.credentials.get().is_authenticated());
}

#[tokio::test]
async fn test_logout_drops_session_and_cache() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    fixture.transport.respond(
        Method::GET,
        "/jsd/deploys/d1",
        StatusCode::OK,
        deployment_body("d1", "READY"),
    );
    fixture.state.cache.get("d1").await.unwrap();

    fixture.state.logout().await.unwrap();

    assert!(fixture.state.cache.is_empty());
    assert!(!fixture.state.credentials.get().is_authenticated());
    assert!(!fixture.credentials_file().exists().await);
}

fn requests_to(fixture: &Fixture, path: &str) -> usize {
    fixture
        .transport
        .requests()
        .iter()
        .filter(|r| r.path == path)
        .count()
}

#[tokio::test]
async fn test_expired_session_discards_cached_deployments_and_tails() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    let transport = &fixture.transport;
    transport.respond(
        Method::GET,
        "/jsd/deploys/d1",
        StatusCode::OK,
        deployment_body("d1", "READY"),
    );
    transport.respond(Method::GET, "/jsd/deploys/d1/logs", StatusCode::OK, json!([]));
    transport.respond(
        Method::GET,
        "/jsd/deploys/d2",
        StatusCode::UNAUTHORIZED,
        json!({"error": "Token expired"}),
    );
    transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        json!({"accessToken": "tok-2", "userId": "u2"}),
    );
    let state = &fixture.state;

    state.cache.get("d1").await.unwrap();
    let mut tail = state.poller.watch("d1");
    while let Some(event) = tail.next().await {
        if matches!(event, TailEvent::Ended(_)) {
            break;
        }
    }

    assert!(state.cache.get("d2").await.unwrap_err().is_unauthorized());

    assert!(state.cache.is_empty());
    assert!(state.cache.peek_list().is_none());
    assert!(!state.poller.is_watching("d1"));
    assert!(tail.next().await.is_none());

    // the next user starts from an empty cache
    state.auth.login("bo@example.com", "secret").await.unwrap();
    let before = requests_to(&fixture, "/jsd/deploys/d1");
    state.cache.get("d1").await.unwrap();
    assert_eq!(requests_to(&fixture, "/jsd/deploys/d1"), before + 1);
    let request = transport.last_request("/jsd/deploys/d1").unwrap();
    assert_eq!(request.header("authorization"), Some("Bearer tok-2"));
}

#[tokio::test]
async fn test_deployment_id_stays_one_path_segment() {
    let fixture = fixture(Some("tok-1"), Some("u1")).await;
    fixture.transport.respond(
        Method::GET,
        "/jsd/deploys/a%2F..%2Fb%3Fx%20y",
        StatusCode::OK,
        deployment_body("a/../b?x y", "READY"),
    );

    let deployment = fixture.state.cache.get("a/../b?x y").await.unwrap();
    assert_eq!(deployment.id, "a/../b?x y");

    let dot_segment = fixture.state.cache.get("..").await.unwrap_err();
    assert!(matches!(dot_segment, ClientError::Validation(_)));

    let paths: Vec<String> = fixture.transport.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/jsd/deploys/a%2F..%2Fb%3Fx%20y"]);
}

#[tokio::test]
async fn test_restore_discards_expired_token() {
    let expired = jwt(json!({"sub": "u1", "exp": Utc::now().timestamp() - 60}));
    let fixture = fixture(Some(&expired), Some("u1")).await;

    let session = fixture.state.auth.restore().await.unwrap();

    assert!(!session.is_authenticated());
    assert!(!fixture.state.credentials.get().is_authenticated());

    let valid = jwt(json!({"sub": "u1", "exp": Utc::now().timestamp() + 3600}));
    fixture.state.credentials.set(&valid, Some("u1")).await.unwrap();
    assert!(fixture.state.auth.restore().await.unwrap().is_authenticated());
    let _ = tokio::fs::remove_dir_all(&fixture.dir).await;
}

#[tokio::test]
async fn test_register_then_verify_signs_in() {
    let fixture = fixture(None, None).await;
    for path in ["/auth/register", "/auth/verify-email"] {
        fixture
            .transport
            .respond(Method::POST, path, StatusCode::OK, json!({"message": "ok"}));
    }
    fixture.transport.respond(
        Method::POST,
        "/auth/login",
        StatusCode::OK,
        json!({"jwt": "tok-3", "userId": "7"}),
    );

    fixture
        .state
        .auth
        .register("Ana", " ana@example.com ", "secret")
        .await
        .unwrap();
    let register = fixture.transport.last_request("/auth/register").unwrap();
    assert_eq!(register.body.as_ref().unwrap()["email"], "ana@example.com");
    assert!(!fixture.state.credentials.get().is_authenticated());

    let session = fixture
        .state
        .auth
        .verify_email("ana@example.com", "123456", "secret")
        .await
        .unwrap();

    assert_eq!(session.token(), Some("tok-3"));
    assert_eq!(session.user_id(), Some("7"));
    let paths: Vec<String> = fixture.transport.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/auth/register", "/auth/verify-email", "/auth/login"]);
}

#[tokio::test]
async fn test_reset_password_requires_code() {
    let fixture = fixture(None, None).await;

    let result = fixture
        .state
        .auth
        .reset_password("ana@example.com", " ", "new-secret")
        .await;

    assert!(matches!(result, Err(ClientError::Validation(_))));
    assert!(fixture.transport.requests().is_empty());
}
