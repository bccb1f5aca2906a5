//! Process-wide sync state, shared by every component through an `Arc`.
//!
//! Holds the two readiness barriers (remote health, service account) as
//! `watch` channels so waiters are woken on change instead of polling, and
//! the "seed loop active" flag as an atomic with an RAII guard.

use crate::error::{SyncError, SyncResult};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// Shared readiness and seed-loop state.
pub struct SyncCoordinator {
    remote_healthy: watch::Sender<bool>,
    service_account_ready: watch::Sender<bool>,
    syncing: AtomicBool,
    epoch: Instant,
    /// Millis since `epoch` of the last health verdict, offset by one so 0 means never.
    health_checked_at: AtomicU64,
    completed_runs: AtomicU64,
}

/// Point-in-time view, reported by the relay's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorSnapshot {
    pub remote_healthy: bool,
    pub service_account_ready: bool,
    pub syncing: bool,
    pub completed_runs: u64,
}

impl Default for SyncCoordinator {
    fn default() -> Self {
        Self {
            remote_healthy: watch::channel(false).0,
            service_account_ready: watch::channel(false).0,
            syncing: AtomicBool::new(false),
            epoch: Instant::now(),
            health_checked_at: AtomicU64::new(0),
            completed_runs: AtomicU64::new(0),
        }
    }
}

impl SyncCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── Remote health ────────────────────────────────────────────

    pub fn is_remote_healthy(&self) -> bool {
        *self.remote_healthy.borrow()
    }

    /// Records a health verdict and stamps the check time.
    pub fn set_remote_healthy(&self, healthy: bool) {
        let elapsed = Instant::now().saturating_duration_since(self.epoch);
        self.health_checked_at
            .store(elapsed.as_millis() as u64 + 1, Ordering::Release);
        let previous = self.remote_healthy.send_replace(healthy);
        if previous != healthy {
            info!(healthy, "remote health changed");
        }
    }

    /// Age of the last health verdict, `None` if never checked.
    pub fn health_age(&self) -> Option<Duration> {
        match self.health_checked_at.load(Ordering::Acquire) {
            0 => None,
            stamp => {
                let checked = self.epoch + Duration::from_millis(stamp - 1);
                Some(Instant::now().saturating_duration_since(checked))
            }
        }
    }

    /// Subscribes to health changes.
    pub fn watch_health(&self) -> watch::Receiver<bool> {
        self.remote_healthy.subscribe()
    }

    // ── Service account ──────────────────────────────────────────

    pub fn is_service_account_ready(&self) -> bool {
        *self.service_account_ready.borrow()
    }

    /// Opens the service-account barrier. Set once by the startup sequence.
    pub fn mark_service_account_ready(&self) {
        if !self.service_account_ready.send_replace(true) {
            info!("service account ready");
        }
    }

    /// Blocks until the service account exists, or until `deadline` elapses.
    pub async fn wait_for_service_account(&self, deadline: Option<Duration>) -> SyncResult<()> {
        wait_until_set(self.service_account_ready.subscribe(), deadline).await
    }

    // ── Seed loop ────────────────────────────────────────────────

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Claims the seed loop. Returns `None` if a loop is already active.
    pub fn try_begin_seed(self: &Arc<Self>) -> Option<SeedGuard> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!("seed loop claimed");
                SeedGuard {
                    coordinator: Arc::clone(self),
                }
            })
    }

    /// Records that a seed run finished (signalled by either side).
    pub fn mark_seed_completed(&self) {
        let runs = self.completed_runs.fetch_add(1, Ordering::AcqRel) + 1;
        info!(runs, "seed run completed");
    }

    pub fn completed_runs(&self) -> u64 {
        self.completed_runs.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            remote_healthy: self.is_remote_healthy(),
            service_account_ready: self.is_service_account_ready(),
            syncing: self.is_syncing(),
            completed_runs: self.completed_runs(),
        }
    }
}

/// Held for the duration of a seed loop; releases the flag on drop.
pub struct SeedGuard {
    coordinator: Arc<SyncCoordinator>,
}

impl Drop for SeedGuard {
    fn drop(&mut self) {
        self.coordinator.syncing.store(false, Ordering::Release);
        debug!("seed loop released");
    }
}

/// Waits for a boolean barrier to become true.
pub(crate) async fn wait_until_set(
    mut rx: watch::Receiver<bool>,
    deadline: Option<Duration>,
) -> SyncResult<()> {
    let wait = async {
        rx.wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Unavailable("coordinator dropped".into()))
    };
    match deadline {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| SyncError::Timeout)?,
        None => wait.await,
    }
}
