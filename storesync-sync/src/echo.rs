//! Loop suppression markers.
//!
//! Before a sync write that will come back as an inbound event, the writer
//! sets a short-lived `{id}_ignore_{side}` marker; the inbound handler for
//! that side checks it and skips. Markers only expire, they are never
//! cleared explicitly.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storesync_types::SyncDirection;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Shared key/value cache with expiry.
#[async_trait]
pub trait EchoCache: Send + Sync {
    async fn set(&self, key: &str, ttl: Duration);
    async fn exists(&self, key: &str) -> bool;
}

/// Process-local cache. Markers are not visible to other processes, so a
/// commerce side running several instances needs an [`EchoCache`] backed by
/// a shared store such as Redis.
#[derive(Default)]
pub struct MemoryEchoCache {
    entries: RwLock<HashMap<String, Instant>>,
}

impl MemoryEchoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live markers.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().await.values().filter(|exp| **exp > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EchoCache for MemoryEchoCache {
    async fn set(&self, key: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, exp| *exp > now);
        entries.insert(key.to_string(), now + ttl);
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|exp| *exp > Instant::now())
    }
}

/// Marker key for an entity and the side that would receive the echo.
pub fn marker_key(entity_id: &str, direction: SyncDirection) -> String {
    format!("{entity_id}_ignore_{}", direction.side())
}

/// Sets and checks echo markers.
#[derive(Clone)]
pub struct EchoSuppressor {
    cache: Arc<dyn EchoCache>,
    default_ttl: Duration,
}

impl EchoSuppressor {
    pub fn new(cache: Arc<dyn EchoCache>, default_ttl: Duration) -> Self {
        Self { cache, default_ttl }
    }

    /// Marks `entity_id` so that writes in `direction` are skipped for `ttl`
    /// (the configured default when `None`).
    pub async fn mark_ignored(&self, entity_id: &str, direction: SyncDirection, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        debug!(id = entity_id, %direction, ttl_secs = ttl.as_secs(), "echo marker set");
        self.cache.set(&marker_key(entity_id, direction), ttl).await;
    }

    pub async fn is_ignored(&self, entity_id: &str, direction: SyncDirection) -> bool {
        self.cache.exists(&marker_key(entity_id, direction)).await
    }
}
