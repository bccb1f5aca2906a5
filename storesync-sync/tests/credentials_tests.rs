//! Tests for credentials.rs: login exchanges and the session cache.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use storesync_sync::{CredentialStore, HttpLogin, LoginExchange, RemoteConfig, Session, SyncError, SyncResult};
use storesync_types::Identity;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Hands out `token-1`, `token-2`, ... and counts logins.
#[derive(Default)]
struct CountingLogin {
    logins: AtomicUsize,
}

#[async_trait]
impl LoginExchange for CountingLogin {
    async fn login(&self, identity: &Identity) -> SyncResult<Session> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(format!("token-{n}"), json!({ "email": identity.key })))
    }
}

/// Takes a while to answer, so concurrent callers overlap.
#[derive(Default)]
struct SlowLogin {
    logins: AtomicUsize,
}

#[async_trait]
impl LoginExchange for SlowLogin {
    async fn login(&self, identity: &Identity) -> SyncResult<Session> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Session::new(format!("token-{n}"), json!({ "email": identity.key })))
    }
}

fn store(staleness: Duration) -> (Arc<CountingLogin>, CredentialStore) {
    let exchange = Arc::new(CountingLogin::default());
    let store = CredentialStore::new(exchange.clone(), staleness);
    (exchange, store)
}

// ── Cache ───────────────────────────────────────────────────────

#[tokio::test]
async fn reuses_cached_session() {
    let (exchange, store) = store(Duration::from_secs(180));
    let identity = Identity::service("sync@example.com", "pw");

    assert_eq!(store.token(&identity).await.unwrap(), "token-1");
    assert_eq!(store.token(&identity).await.unwrap(), "token-1");
    assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_key_ignores_case() {
    let (exchange, store) = store(Duration::from_secs(180));

    store.token(&Identity::service("Sync@Example.com", "pw")).await.unwrap();
    assert!(store.is_cached(&Identity::service("sync@example.com", "pw")).await);
    store.token(&Identity::service("sync@example.com", "pw")).await.unwrap();
    assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_session_logs_in_again() {
    let (exchange, store) = store(Duration::from_secs(180));
    let identity = Identity::service("sync@example.com", "pw");

    store.token(&identity).await.unwrap();
    tokio::time::advance(Duration::from_secs(181)).await;

    assert_eq!(store.token(&identity).await.unwrap(), "token-2");
    assert_eq!(exchange.logins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refresh_replaces_token() {
    let (_, store) = store(Duration::from_secs(180));
    let identity = Identity::service("sync@example.com", "pw");

    store.token(&identity).await.unwrap();
    assert_eq!(store.refresh(&identity).await.unwrap(), "token-2");
    assert_eq!(store.token(&identity).await.unwrap(), "token-2");
}

#[tokio::test]
async fn invalidate_and_clear_drop_sessions() {
    let (_, store) = store(Duration::from_secs(180));
    let a = Identity::service("a@example.com", "pw");
    let b = Identity::service("b@example.com", "pw");

    store.token(&a).await.unwrap();
    store.token(&b).await.unwrap();

    store.invalidate(&a).await;
    assert!(!store.is_cached(&a).await);
    assert!(store.is_cached(&b).await);

    store.clear().await;
    assert!(!store.is_cached(&b).await);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_calls_share_one_login() {
    let exchange = Arc::new(SlowLogin::default());
    let store = CredentialStore::new(exchange.clone(), Duration::from_secs(180));
    let identity = Identity::service("sync@example.com", "pw");

    let tokens = join_all((0..5).map(|_| store.token(&identity))).await;

    assert_eq!(exchange.logins.load(Ordering::SeqCst), 1);
    for token in tokens {
        assert_eq!(token.unwrap(), "token-1");
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_logins_for_different_identities_do_not_wait_on_each_other() {
    let exchange = Arc::new(SlowLogin::default());
    let store = CredentialStore::new(exchange.clone(), Duration::from_secs(180));
    let a = Identity::service("a@example.com", "pw");
    let b = Identity::administrator("b@example.com", "pw");

    let started = tokio::time::Instant::now();
    let (ta, tb) = tokio::join!(store.token(&a), store.token(&b));

    assert!(ta.is_ok() && tb.is_ok());
    assert_ne!(ta.unwrap(), tb.unwrap());
    assert_eq!(exchange.logins.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[test]
fn identity_debug_masks_secret() {
    let identity = Identity::service("sync@example.com", "hunter2");
    let rendered = format!("{identity:?}");
    assert!(!rendered.contains("hunter2"));
}

// ── HTTP login ──────────────────────────────────────────────────

fn remote(server: &MockServer) -> RemoteConfig {
    RemoteConfig::from_url(&server.uri()).unwrap()
}

#[tokio::test]
async fn service_login_posts_to_auth_local() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/local"))
        .and(body_json(json!({ "identifier": "sync@example.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jwt": "service-jwt",
            "user": { "id": 3, "email": "sync@example.com" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let login = HttpLogin::new(&remote(&server), Duration::from_secs(5)).unwrap();
    let session = login
        .login(&Identity::service("sync@example.com", "pw"))
        .await
        .unwrap();
    assert_eq!(session.token, "service-jwt");
    assert_eq!(session.profile["id"], 3);
}

#[tokio::test]
async fn admin_login_posts_to_admin_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .and(body_json(json!({ "email": "admin@example.com", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": "admin-jwt", "user": { "id": 1 } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let login = HttpLogin::new(&remote(&server), Duration::from_secs(5)).unwrap();
    let session = login
        .login(&Identity::administrator("admin@example.com", "pw"))
        .await
        .unwrap();
    assert_eq!(session.token, "admin-jwt");
}

#[tokio::test]
async fn rejected_login_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/local"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "Invalid identifier or password" })))
        .mount(&server)
        .await;

    let login = HttpLogin::new(&remote(&server), Duration::from_secs(5)).unwrap();
    let err = login
        .login(&Identity::service("sync@example.com", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
}

#[tokio::test]
async fn failed_login_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/local"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let login = HttpLogin::new(&remote(&server), Duration::from_secs(5)).unwrap();
    let store = CredentialStore::new(Arc::new(login), Duration::from_secs(180));
    let identity = Identity::service("sync@example.com", "pw");

    assert!(store.token(&identity).await.is_err());
    assert!(store.token(&identity).await.is_err());
    assert!(!store.is_cached(&identity).await);
}
