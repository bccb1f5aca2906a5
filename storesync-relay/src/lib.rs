//! Wiring and HTTP API for the storesync agent.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storesync_sync::http::build_client;
use storesync_sync::{
    CoordinatorSnapshot, CredentialStore, EchoSuppressor, HealthGate, HttpHealthProbe, HttpLogin,
    MemoryEchoCache, Reconciler, RestContentStore, RetryLayer, SchemaRegistry, SeedDriver,
    SignalCodec, SignalSeedSource, StartupSequence, SyncConfig, SyncCoordinator, SyncResult,
    Translator,
};
use storesync_types::EntityType;
use tracing::{error, info};

/// Body of a `/sync` answer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SyncResponse {
    pub status: String,
}

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    pub driver: Arc<SeedDriver>,
}

async fn health_handler(State(state): State<AppState>) -> Json<CoordinatorSnapshot> {
    Json(state.coordinator.snapshot())
}

async fn sync_handler(State(state): State<AppState>) -> (StatusCode, Json<SyncResponse>) {
    let Some(handle) = state.driver.spawn() else {
        return (
            StatusCode::OK,
            Json(SyncResponse {
                status: "skipped".into(),
            }),
        );
    };
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(summary)) => info!(
                run_id = %summary.run_id,
                synced = summary.synced,
                failed = summary.failed,
                "seed run finished"
            ),
            Ok(Err(e)) => error!(error = %e, "seed run aborted"),
            Err(e) => error!(error = %e, "seed task panicked"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(SyncResponse {
            status: "started".into(),
        }),
    )
}

/// Build the HTTP API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sync", post(sync_handler))
        .with_state(state)
}

/// Every long-lived component of a running agent.
pub struct Agent {
    pub coordinator: Arc<SyncCoordinator>,
    pub reconciler: Arc<Reconciler>,
    pub driver: Arc<SeedDriver>,
    /// Signal channel to the commerce hook.
    pub signals: Arc<SignalSeedSource>,
    pub startup: StartupSequence,
}

impl Agent {
    /// Wires the engine against the remotes named in `config`.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let timeout = config.request_timeout();
        let client = build_client(timeout)?;
        let remote = config.remote.clone();
        let coordinator = SyncCoordinator::new();

        let login = Arc::new(HttpLogin::new(&remote, timeout)?);
        let credentials = Arc::new(CredentialStore::new(login, config.credential_staleness()));
        let probe = Arc::new(HttpHealthProbe::new(client.clone(), &remote.base_url()));
        let health = Arc::new(
            HealthGate::new(probe, coordinator.clone(), config.health.clone())
                .with_credentials(credentials.clone()),
        );
        let store = Arc::new(RestContentStore::new(
            client.clone(),
            remote.api_url(),
            credentials.clone(),
            health.clone(),
            coordinator.clone(),
            RetryLayer::new(config.retry.clone()),
        ));

        let translator = Translator::new(Arc::new(SchemaRegistry::standard()?))
            .with_remaps(config.field_remaps.clone());
        let echo = EchoSuppressor::new(Arc::new(MemoryEchoCache::new()), config.echo_ttl());
        let reconciler = Arc::new(Reconciler::new(store, translator, echo));

        let codec = SignalCodec::new(&config.signal_secret);
        let signals = Arc::new(SignalSeedSource::new(client.clone(), &config.commerce_url, codec));
        let driver = Arc::new(SeedDriver::new(
            signals.clone(),
            reconciler.clone(),
            coordinator.clone(),
            config.service.clone(),
        ));

        let startup = StartupSequence::new(
            client,
            remote,
            config.admin.clone(),
            config.service.clone(),
            credentials,
            health,
            coordinator.clone(),
            config.retry.clone(),
        )
        .sync_on_startup(config.sync_on_startup);

        Ok(Self {
            coordinator,
            reconciler,
            driver,
            signals,
            startup,
        })
    }

    /// Sends a content-side edit of a local-format entity to the commerce
    /// system.
    pub async fn push_update(&self, entity_type: EntityType, entity: &Value) -> SyncResult<Value> {
        self.signals
            .push_update(self.reconciler.translator(), entity_type, entity)
            .await
    }

    pub fn state(&self) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            driver: self.driver.clone(),
        }
    }
}
