//! Remote liveness gate.
//!
//! A healthy verdict is trusted for `check_interval`; an unhealthy or
//! missing verdict is always re-probed. Going unhealthy clears the session
//! cache so every identity re-authenticates once the remote is back.

use crate::config::HealthConfig;
use crate::coordinator::SyncCoordinator;
use crate::credentials::CredentialStore;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable health states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Checking,
    Healthy,
    Unhealthy,
}

/// A single liveness probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns `Some(status)` if the remote answered at all.
    async fn probe(&self) -> Option<u16>;
}

/// `HEAD {base}/_health`.
pub struct HttpHealthProbe {
    client: Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{base_url}/_health"),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Option<u16> {
        match self.client.head(&self.url).send().await {
            Ok(resp) => Some(resp.status().as_u16()),
            Err(e) => {
                debug!(url = %self.url, error = %e, "health probe failed");
                None
            }
        }
    }
}

/// Blocks outbound traffic until the remote is healthy.
pub struct HealthGate {
    probe: Arc<dyn HealthProbe>,
    coordinator: Arc<SyncCoordinator>,
    credentials: Option<Arc<CredentialStore>>,
    config: HealthConfig,
    checking: tokio::sync::Mutex<()>,
}

impl HealthGate {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        coordinator: Arc<SyncCoordinator>,
        config: HealthConfig,
    ) -> Self {
        Self {
            probe,
            coordinator,
            credentials: None,
            config,
            checking: tokio::sync::Mutex::new(()),
        }
    }

    /// Attaches the session cache to clear on an unhealthy verdict.
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn state(&self) -> HealthState {
        if self.checking.try_lock().is_err() {
            return HealthState::Checking;
        }
        match self.coordinator.health_age() {
            None => HealthState::Unknown,
            Some(_) if self.coordinator.is_remote_healthy() => HealthState::Healthy,
            Some(_) => HealthState::Unhealthy,
        }
    }

    /// Returns the current verdict, probing if the cached one is not a
    /// fresh healthy result. Concurrent callers share one probe run.
    pub async fn check(&self) -> bool {
        if self.is_fresh_healthy() {
            return true;
        }

        let _checking = self.checking.lock().await;
        // Another caller may have finished probing while we waited.
        if self.is_fresh_healthy() {
            return true;
        }

        let healthy = self.run_probes().await;
        self.coordinator.set_remote_healthy(healthy);
        if healthy {
            info!("remote is healthy");
        } else {
            warn!("remote is unhealthy");
            if let Some(credentials) = &self.credentials {
                credentials.clear().await;
            }
        }
        healthy
    }

    /// Blocks until a healthy verdict is observed. Probes every
    /// `poll_interval` while waiting and wakes early if another task
    /// records a healthy verdict.
    pub async fn wait_for_health(&self, deadline: Option<Duration>) -> SyncResult<()> {
        let wait = async {
            let mut rx = self.coordinator.watch_health();
            loop {
                if self.check().await {
                    return;
                }
                debug!("awaiting remote health");
                tokio::select! {
                    _ = rx.changed() => {}
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        };
        match deadline {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| SyncError::Unavailable("remote did not become healthy".into())),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    fn is_fresh_healthy(&self) -> bool {
        self.coordinator.is_remote_healthy()
            && self
                .coordinator
                .health_age()
                .is_some_and(|age| age <= self.config.check_interval())
    }

    /// Probes up to `probe_attempts` times until the remote answers at all,
    /// then judges the answer.
    async fn run_probes(&self) -> bool {
        let attempts = self.config.probe_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(status) = self.probe.probe().await {
                debug!(status, attempt, "health probe answered");
                return status < 300;
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.probe_retry()).await;
            }
        }
        false
    }
}

/// Test double that answers from a scripted sequence of statuses and then
/// repeats the last one.
pub mod mock {
    use super::HealthProbe;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct ScriptedProbe {
        script: Mutex<Vec<Option<u16>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub fn new(script: Vec<Option<u16>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> Option<u16> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let script = match self.script.lock() {
                Ok(script) => script,
                Err(poisoned) => poisoned.into_inner(),
            };
            script.get(n).or(script.last()).copied().flatten()
        }
    }
}
