//! Startup sequencing against the content system.
//!
//! Order: remote healthy, administrator registered (tolerated if it already
//! exists), administrator logged in, service account registered, service
//! account barrier released, service account logged in, and optionally a
//! remote-initiated seed. Any failure other than the administrator
//! registration aborts startup.

use crate::config::{RemoteConfig, RetryConfig};
use crate::coordinator::SyncCoordinator;
use crate::credentials::CredentialStore;
use crate::error::SyncResult;
use crate::health::HealthGate;
use crate::http::check_response;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use storesync_types::Identity;
use tracing::{error, info, warn};

/// What the startup sequence did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartupReport {
    /// False when registration failed, usually because the administrator
    /// already exists.
    pub admin_registered: bool,
    pub seed_requested: bool,
}

pub struct StartupSequence {
    client: Client,
    remote: RemoteConfig,
    admin: Identity,
    service: Identity,
    credentials: Arc<CredentialStore>,
    health: Arc<HealthGate>,
    coordinator: Arc<SyncCoordinator>,
    retry: RetryConfig,
    sync_on_startup: bool,
}

impl StartupSequence {
    pub fn new(
        client: Client,
        remote: RemoteConfig,
        admin: Identity,
        service: Identity,
        credentials: Arc<CredentialStore>,
        health: Arc<HealthGate>,
        coordinator: Arc<SyncCoordinator>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            remote,
            admin,
            service,
            credentials,
            health,
            coordinator,
            retry,
            sync_on_startup: false,
        }
    }

    pub fn sync_on_startup(mut self, enabled: bool) -> Self {
        self.sync_on_startup = enabled;
        self
    }

    pub async fn run(&self) -> SyncResult<StartupReport> {
        let mut report = StartupReport::default();

        self.health.wait_for_health(None).await?;

        report.admin_registered = match self.register_admin().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "administrator registration failed, it may already exist");
                false
            }
        };

        let admin_token = self.credentials.token(&self.admin).await.map_err(|e| {
            error!(error = %e, "administrator login failed");
            e
        })?;

        self.register_service_account(&admin_token).await?;
        self.coordinator.mark_service_account_ready();
        info!(identity = %self.service.key, "service account ready");

        self.credentials.token(&self.service).await?;

        if self.sync_on_startup {
            self.request_seed(&admin_token).await?;
            report.seed_requested = true;
        }

        info!(?report, "content system bootstrapped");
        Ok(report)
    }

    async fn post(&self, url: &str, token: Option<&str>, body: Value) -> SyncResult<()> {
        let mut request = self.client.post(url).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await?;
        check_response(resp, &self.retry, 1).await?;
        Ok(())
    }

    async fn register_admin(&self) -> SyncResult<()> {
        let url = format!("{}/admin/register-admin", self.remote.base_url());
        self.post(
            &url,
            None,
            json!({ "email": self.admin.key, "password": self.admin.secret }),
        )
        .await
    }

    async fn register_service_account(&self, admin_token: &str) -> SyncResult<()> {
        let url = format!(
            "{}/{}/create-medusa-user",
            self.remote.base_url(),
            self.remote.namespace
        );
        self.post(
            &url,
            Some(admin_token),
            json!({
                "username": self.service.key,
                "email": self.service.key,
                "password": self.service.secret,
            }),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "service account registration failed");
            e
        })
    }

    /// Asks the content system to pull a full seed.
    pub async fn request_seed(&self, admin_token: &str) -> SyncResult<()> {
        self.health.wait_for_health(None).await?;
        let url = format!(
            "{}/{}/synchronise-medusa-tables",
            self.remote.base_url(),
            self.remote.namespace
        );
        self.post(&url, Some(admin_token), json!({})).await?;
        info!("remote seed requested");
        Ok(())
    }
}
