//! Paged bulk seed.
//!
//! The content side asks the commerce side for page N of every seed
//! collection at once, reconciles all of them in dependency order, and asks
//! for page N+1 only while some collection still reports `hasMore`. The
//! commerce side builds those pages from its catalog.

use crate::commerce::CommerceCatalog;
use crate::coordinator::{SeedGuard, SyncCoordinator};
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{DeferredRelation, Reconciler};
use crate::shape::{rename_ids, reshape};
use crate::signal::{SIGNAL_HOOK_PATH, SignalCodec, SignalMessage};
use crate::translate::Translator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use storesync_types::{EntityType, Identity, RunId};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Collections carried in a seed page.
pub const SEED_COLLECTIONS: [EntityType; 8] = [
    EntityType::FulfillmentProvider,
    EntityType::PaymentProvider,
    EntityType::Region,
    EntityType::ShippingProfile,
    EntityType::ShippingOption,
    EntityType::ProductCollection,
    EntityType::Product,
    EntityType::Store,
];

/// Page metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedMeta {
    pub page_number: u32,
    pub page_limit: usize,
    /// Per collection key; a missing entry means no more pages.
    #[serde(default)]
    pub has_more: BTreeMap<String, bool>,
}

/// One page of every seed collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedPage {
    pub meta: SeedMeta,
    #[serde(default, deserialize_with = "collections")]
    pub data: BTreeMap<String, Vec<Value>>,
}

/// A collection may be sent as a single entity instead of an array.
fn collections<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let items = match v {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            (k, items)
        })
        .collect())
}

impl SeedPage {
    pub fn collection(&self, entity_type: EntityType) -> &[Value] {
        self.data
            .get(&entity_type.seed_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_more(&self, entity_type: EntityType) -> bool {
        self.meta
            .has_more
            .get(&entity_type.seed_key())
            .copied()
            .unwrap_or(false)
    }

    /// Collections present in the page, unknown keys skipped.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.data
            .keys()
            .filter_map(|key| {
                let parsed = EntityType::from_seed_key(key);
                if parsed.is_none() {
                    warn!(collection = %key, "unknown seed collection");
                }
                parsed
            })
            .collect()
    }

    /// Collections that still have pages after this one.
    pub fn continuing(&self) -> BTreeSet<EntityType> {
        self.meta
            .has_more
            .iter()
            .filter(|(_, more)| **more)
            .filter_map(|(key, _)| EntityType::from_seed_key(key))
            .collect()
    }
}

// ── Content side ────────────────────────────────────────────────

/// Where seed pages come from.
#[async_trait]
pub trait SeedSource: Send + Sync {
    async fn fetch_page(&self, page_number: u32) -> SyncResult<SeedPage>;

    /// Tells the commerce side the run finished.
    async fn complete(&self) -> SyncResult<()>;
}

/// Fetches pages by posting signed `SEED` signals to the commerce hook, and
/// carries content-side edits back the same way.
pub struct SignalSeedSource {
    client: Client,
    hook_url: String,
    codec: SignalCodec,
}

impl SignalSeedSource {
    pub fn new(client: Client, commerce_url: &str, codec: SignalCodec) -> Self {
        Self {
            client,
            hook_url: format!("{}{SIGNAL_HOOK_PATH}", commerce_url.trim_end_matches('/')),
            codec,
        }
    }

    async fn send(&self, message: &SignalMessage) -> SyncResult<Value> {
        let signed = self.codec.sign(message)?;
        let resp = self
            .client
            .post(&self.hook_url)
            .json(&json!({ "signedMessage": signed }))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Pushes a content-side edit of a local-format `entity` to the commerce
    /// side as a signed `UPDATE MEDUSA` signal. Returns the commerce entity
    /// after the update.
    pub async fn push_update(
        &self,
        translator: &Translator,
        entity_type: EntityType,
        entity: &Value,
    ) -> SyncResult<Value> {
        let content = translator.outbound(Some(entity_type), entity);
        let mut reply = self
            .send(&SignalMessage::update_commerce(entity_type, content))
            .await
            .inspect_err(|e| warn!(%entity_type, error = %e, "commerce update rejected"))?;
        debug!(%entity_type, "commerce update accepted");
        Ok(match reply.get_mut("data") {
            Some(data) => data.take(),
            None => reply,
        })
    }
}

#[async_trait]
impl SeedSource for SignalSeedSource {
    async fn fetch_page(&self, page_number: u32) -> SyncResult<SeedPage> {
        let body = self.send(&SignalMessage::seed(page_number)).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn complete(&self) -> SyncResult<()> {
        self.send(&SignalMessage::sync_completed()).await.map(|_| ())
    }
}

/// Result of a seed trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedRun {
    /// Another loop was already running.
    Skipped,
    Completed(SeedSummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub run_id: RunId,
    pub pages: u32,
    pub synced: usize,
    pub failed: usize,
    /// References still missing their target at the end of the run.
    pub unresolved: Vec<DeferredRelation>,
    /// Whether the commerce side accepted the completion signal.
    pub acknowledged: bool,
}

/// Drives the seed loop on the content side.
pub struct SeedDriver {
    source: Arc<dyn SeedSource>,
    reconciler: Arc<Reconciler>,
    coordinator: Arc<SyncCoordinator>,
    identity: Identity,
}

impl SeedDriver {
    pub fn new(
        source: Arc<dyn SeedSource>,
        reconciler: Arc<Reconciler>,
        coordinator: Arc<SyncCoordinator>,
        identity: Identity,
    ) -> Self {
        Self {
            source,
            reconciler,
            coordinator,
            identity,
        }
    }

    /// Runs a seed loop unless one is already active.
    pub async fn run(&self) -> SyncResult<SeedRun> {
        let Some(guard) = self.coordinator.try_begin_seed() else {
            info!("seed already running, skipping");
            return Ok(SeedRun::Skipped);
        };
        self.run_guarded(guard).await.map(SeedRun::Completed)
    }

    /// Starts a seed loop in the background. `None` if one is already active.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<SyncResult<SeedSummary>>> {
        let Some(guard) = self.coordinator.try_begin_seed() else {
            info!("seed already running, skipping");
            return None;
        };
        let driver = Arc::clone(self);
        Some(tokio::spawn(async move { driver.run_guarded(guard).await }))
    }

    async fn run_guarded(&self, guard: SeedGuard) -> SyncResult<SeedSummary> {
        let run_id = RunId::new();
        let span = info_span!("seed", run_id = %run_id);
        let result = self.seed_loop(run_id).instrument(span).await;
        drop(guard);
        result
    }

    async fn seed_loop(&self, run_id: RunId) -> SyncResult<SeedSummary> {
        let schemas = self.reconciler.translator().schemas().clone();
        let mut summary = SeedSummary {
            run_id,
            pages: 0,
            synced: 0,
            failed: 0,
            unresolved: Vec::new(),
            acknowledged: false,
        };
        let mut page_number = 1;
        let mut active: Option<BTreeSet<EntityType>> = None;
        let mut deferred = Vec::new();

        info!("seed started");
        loop {
            let page = self.source.fetch_page(page_number).await.map_err(|e| {
                error!(page = page_number, error = %e, "seed page fetch failed");
                e
            })?;
            summary.pages += 1;

            let mut types: Vec<EntityType> = page
                .entity_types()
                .into_iter()
                .filter(|t| active.as_ref().is_none_or(|a| a.contains(t)))
                .collect();
            schemas.sort_by_dependency(&mut types);

            for entity_type in types {
                let entities = page.collection(entity_type);
                debug!(%entity_type, count = entities.len(), page = page_number, "seeding collection");
                for entity in entities {
                    let entity = with_seed_defaults(entity.clone());
                    match self.reconciler.upsert(entity_type, &entity, &self.identity).await {
                        Ok(outcome) if outcome.is_success() => {
                            summary.synced += 1;
                            deferred.extend(outcome.deferred);
                        }
                        Ok(outcome) => {
                            warn!(%entity_type, id = ?outcome.id, status = %outcome.status, "seed entity not synced");
                            summary.failed += 1;
                        }
                        Err(e) => {
                            error!(%entity_type, error = %e, "seed entity failed");
                            summary.failed += 1;
                        }
                    }
                }
            }

            if !deferred.is_empty() {
                deferred = self.reconciler.reattach(deferred, &self.identity).await;
            }
            info!(page = page_number, synced = summary.synced, failed = summary.failed, "seed page done");

            let continuing = page.continuing();
            if continuing.is_empty() {
                break;
            }
            active = Some(continuing);
            page_number += 1;
        }

        if !deferred.is_empty() {
            warn!(count = deferred.len(), "references left unresolved after seed");
        }
        summary.unresolved = deferred;

        match self.source.complete().await {
            Ok(()) => summary.acknowledged = true,
            Err(e) => warn!(error = %e, "completion signal failed"),
        }
        self.coordinator.mark_seed_completed();
        info!(pages = summary.pages, synced = summary.synced, failed = summary.failed, "seed finished");
        Ok(summary)
    }
}

fn with_seed_defaults(mut entity: Value) -> Value {
    if let Some(map) = entity.as_object_mut() {
        map.entry("locale").or_insert_with(|| json!("en"));
        map.entry("publishedAt")
            .or_insert_with(|| json!(chrono::Utc::now().to_rfc3339()));
    }
    entity
}

// ── Commerce side ───────────────────────────────────────────────

/// Builds seed pages from the commerce catalog.
pub struct SeedPageBuilder {
    catalog: Arc<dyn CommerceCatalog>,
    page_limit: usize,
}

impl SeedPageBuilder {
    pub fn new(catalog: Arc<dyn CommerceCatalog>, page_limit: usize) -> Self {
        Self {
            catalog,
            page_limit: page_limit.max(1),
        }
    }

    pub async fn build(&self, page_number: u32) -> SyncResult<SeedPage> {
        let page_number = page_number.max(1);
        let skip = (page_number as usize - 1) * self.page_limit;
        let mut page = SeedPage {
            meta: SeedMeta {
                page_number,
                page_limit: self.page_limit,
                has_more: BTreeMap::new(),
            },
            data: BTreeMap::new(),
        };

        for entity_type in SEED_COLLECTIONS {
            let entities = self.catalog.list(entity_type, skip, self.page_limit).await?;
            let key = entity_type.seed_key();
            // Stores are a single record and never paginate.
            if entity_type != EntityType::Store {
                page.meta
                    .has_more
                    .insert(key.clone(), entities.len() == self.page_limit);
            }
            let entities = entities
                .into_iter()
                .map(|e| {
                    let mut e = reshape(entity_type, e);
                    rename_ids(&mut e);
                    e
                })
                .collect();
            page.data.insert(key, entities);
        }
        debug!(page = page_number, limit = self.page_limit, "seed page built");
        Ok(page)
    }
}
