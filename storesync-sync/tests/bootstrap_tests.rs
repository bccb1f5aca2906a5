//! Tests for bootstrap.rs: the startup sequence against a mocked content
//! system.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use storesync_sync::health::mock::ScriptedProbe;
use storesync_sync::http::build_client;
use storesync_sync::{
    CredentialStore, HealthConfig, HealthGate, HttpLogin, RemoteConfig, RetryConfig,
    StartupReport, StartupSequence, SyncCoordinator, SyncError,
};
use storesync_types::Identity;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NS: &str = "/strapi-plugin-medusajs";

fn admin() -> Identity {
    Identity::administrator("admin@example.com", "admin-pw")
}

fn service() -> Identity {
    Identity::service("sync@example.com", "sync-pw")
}

fn sequence(server: &MockServer, coordinator: Arc<SyncCoordinator>) -> StartupSequence {
    let remote = RemoteConfig::from_url(&server.uri()).unwrap();
    let login = Arc::new(HttpLogin::new(&remote, Duration::from_secs(5)).unwrap());
    let credentials = Arc::new(CredentialStore::new(login, Duration::from_secs(180)));
    let health = Arc::new(HealthGate::new(
        Arc::new(ScriptedProbe::new(vec![Some(200)])),
        coordinator.clone(),
        HealthConfig::default(),
    ));
    StartupSequence::new(
        build_client(Duration::from_secs(5)).unwrap(),
        remote,
        admin(),
        service(),
        credentials,
        health,
        coordinator,
        RetryConfig::default(),
    )
}

async fn mount_logins(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .and(body_json(json!({ "email": "admin@example.com", "password": "admin-pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": "admin-token", "user": { "id": 1 } }
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/local"))
        .and(body_json(json!({ "identifier": "sync@example.com", "password": "sync-pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jwt": "service-token",
            "user": { "id": 2 }
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_service_registration(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("{NS}/create-medusa-user")))
        .and(header("authorization", "Bearer admin-token"))
        .and(body_json(json!({
            "username": "sync@example.com",
            "email": "sync@example.com",
            "password": "sync-pw"
        })))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
        .mount(server)
        .await;
}

// ── Sequence ────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_remote_is_bootstrapped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/register-admin"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_logins(&server).await;
    mount_service_registration(&server, 200).await;

    let coordinator = SyncCoordinator::new();
    let report = sequence(&server, coordinator.clone()).run().await.unwrap();

    assert_eq!(
        report,
        StartupReport {
            admin_registered: true,
            seed_requested: false,
        }
    );
    assert!(coordinator.is_service_account_ready());
    assert!(coordinator.is_remote_healthy());
}

#[tokio::test]
async fn existing_admin_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/register-admin"))
        .respond_with(ResponseTemplate::new(400).set_body_string("already registered"))
        .expect(1)
        .mount(&server)
        .await;
    mount_logins(&server).await;
    mount_service_registration(&server, 200).await;

    let coordinator = SyncCoordinator::new();
    let report = sequence(&server, coordinator.clone()).run().await.unwrap();

    assert!(!report.admin_registered);
    assert!(coordinator.is_service_account_ready());
}

#[tokio::test]
async fn seed_is_requested_when_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/register-admin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_logins(&server).await;
    mount_service_registration(&server, 200).await;
    Mock::given(method("POST"))
        .and(path(format!("{NS}/synchronise-medusa-tables")))
        .and(header("authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let report = sequence(&server, SyncCoordinator::new())
        .sync_on_startup(true)
        .run()
        .await
        .unwrap();
    assert!(report.seed_requested);
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test]
async fn failed_service_registration_aborts_startup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/register-admin"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "token": "admin-token" }
        })))
        .mount(&server)
        .await;
    mount_service_registration(&server, 500).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/local"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jwt": "t" })))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = SyncCoordinator::new();
    let err = sequence(&server, coordinator.clone()).run().await.unwrap_err();

    assert!(matches!(err, SyncError::Http { status: 500, .. }));
    assert!(!coordinator.is_service_account_ready());
}

#[tokio::test]
async fn rejected_admin_login_aborts_startup() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/register-admin"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/login"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{NS}/create-medusa-user")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = sequence(&server, SyncCoordinator::new()).run().await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
}
