//! Commerce events to reconciliation calls.
//!
//! One handler per `(entity, action)` event name. Each handler merges the
//! event data over the entity as currently stored in the commerce catalog,
//! reshapes it and calls the [`Reconciler`]. Product events fan out to their
//! variants once the product itself has been written.

use crate::commerce::CommerceCatalog;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{Reconciler, SyncOutcome, SyncStatus};
use crate::shape::reshape;
use futures::future::join_all;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use storesync_types::{EntityType, Identity, LOCAL_ID_FIELD, LocalId};
use tracing::{debug, info, warn};

/// Fields whose presence makes a membership change worth syncing.
const COLLECTION_MEMBERSHIP_FIELDS: &[&str] = &["productIds", "productCollection"];
const CATEGORY_MEMBERSHIP_FIELDS: &[&str] = &["productIds", "productCategories"];

/// Key listing the changed fields in an update event.
const CHANGED_FIELDS_KEY: &str = "fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
    ProductsAdded,
    ProductsRemoved,
}

/// A parsed commerce event name (`product-variant.updated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventName {
    pub entity_type: EntityType,
    pub action: EventAction,
}

impl FromStr for EventName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SyncError::ValidationConflict(format!("unknown event '{s}'"));
        let (subject, action) = s.rsplit_once('.').ok_or_else(unknown)?;

        // `product.metafields.create`
        if subject == "product.metafields" {
            let action = match action {
                "create" => EventAction::Created,
                "update" => EventAction::Updated,
                _ => return Err(unknown()),
            };
            return Ok(Self {
                entity_type: EntityType::ProductMetafield,
                action,
            });
        }

        let entity_type = EntityType::from_relation_key(subject).ok_or_else(unknown)?;
        let action = match action {
            "created" => EventAction::Created,
            "updated" => EventAction::Updated,
            "deleted" => EventAction::Deleted,
            "products_added" => EventAction::ProductsAdded,
            "products_removed" => EventAction::ProductsRemoved,
            _ => return Err(unknown()),
        };
        Ok(Self {
            entity_type,
            action,
        })
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            EventAction::Created => "created",
            EventAction::Updated => "updated",
            EventAction::Deleted => "deleted",
            EventAction::ProductsAdded => "products_added",
            EventAction::ProductsRemoved => "products_removed",
        };
        write!(f, "{}.{action}", self.entity_type.singular())
    }
}

/// Event names the bridge subscribes to.
pub const SUBSCRIBED_EVENTS: &[&str] = &[
    "region.created",
    "region.updated",
    "region.deleted",
    "product-variant.created",
    "product-variant.updated",
    "product-variant.deleted",
    "product.created",
    "product.updated",
    "product.deleted",
    "product.metafields.create",
    "product.metafields.update",
    "product-collection.created",
    "product-collection.updated",
    "product-collection.products_added",
    "product-collection.products_removed",
    "product-category.created",
    "product-category.updated",
];

/// Routes commerce events to the reconciler.
pub struct EventBridge {
    reconciler: Arc<Reconciler>,
    catalog: Arc<dyn CommerceCatalog>,
    default_identity: Identity,
}

impl EventBridge {
    pub fn new(reconciler: Arc<Reconciler>, catalog: Arc<dyn CommerceCatalog>, default_identity: Identity) -> Self {
        Self {
            reconciler,
            catalog,
            default_identity,
        }
    }

    /// Handles one event. `operator` is the identity of the logged-in
    /// operator who caused it, if any. Outcomes are returned parent first.
    pub async fn handle(&self, event: &str, data: &Value, operator: Option<&Identity>) -> SyncResult<Vec<SyncOutcome>> {
        let name: EventName = event.parse()?;
        let identity = operator.unwrap_or(&self.default_identity);
        debug!(event = %name, identity = %identity.key, "commerce event");

        let outcomes = match (name.entity_type, name.action) {
            (EntityType::Product, EventAction::Created) => self.product_created(data, identity).await?,
            (EntityType::Product, EventAction::Updated) => self.product_updated(data, identity).await?,
            (t, EventAction::Created) => vec![self.created(t, data, identity).await?],
            (t @ (EntityType::ProductCollection | EntityType::ProductCategory), EventAction::Updated) => {
                let mut outcomes = vec![self.updated(t, data, identity).await?];
                if data.get("productIds").is_some() {
                    outcomes.extend(self.membership_changed(t, data, identity).await?);
                }
                outcomes
            }
            (t, EventAction::Updated) => vec![self.updated(t, data, identity).await?],
            (t, EventAction::Deleted) => {
                let id = event_id(data)?;
                vec![self.reconciler.delete(t, id.as_str(), identity).await?]
            }
            (t, EventAction::ProductsAdded | EventAction::ProductsRemoved) => {
                self.membership_changed(t, data, identity).await?
            }
        };

        for outcome in &outcomes {
            if !outcome.is_success() {
                warn!(event = %name, entity_type = %outcome.entity_type, id = ?outcome.id, status = %outcome.status, "event not synced");
            }
        }
        Ok(outcomes)
    }

    /// The stored entity with the event data laid over it.
    async fn merged(&self, entity_type: EntityType, data: &Value) -> SyncResult<Value> {
        let id = event_id(data)?;
        let mut entity = self
            .catalog
            .retrieve(entity_type, id.as_str())
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        if let (Some(target), Some(changes)) = (entity.as_object_mut(), data.as_object()) {
            for (k, v) in changes {
                if k != CHANGED_FIELDS_KEY {
                    target.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(entity)
    }

    async fn created(&self, entity_type: EntityType, data: &Value, identity: &Identity) -> SyncResult<SyncOutcome> {
        let entity = self.merged(entity_type, data).await?;
        let outcome = self
            .reconciler
            .create(entity_type, &reshape(entity_type, entity), identity)
            .await?;
        self.close_deferred(outcome, identity).await
    }

    async fn updated(&self, entity_type: EntityType, data: &Value, identity: &Identity) -> SyncResult<SyncOutcome> {
        let id = event_id(data)?;
        let changed = changed_fields(data);
        let entity = self.merged(entity_type, data).await?;
        let payload = reshape(entity_type, entity);
        let outcome = self
            .reconciler
            .update_changed(entity_type, id.as_str(), &payload, &changed, identity)
            .await?;

        let fall_back = outcome.status == SyncStatus::NotFound
            && matches!(entity_type, EntityType::Product | EntityType::ProductVariant);
        if fall_back {
            info!(%entity_type, id = %id, "not in content system, creating");
            let created = self.reconciler.create(entity_type, &payload, identity).await?;
            return self.close_deferred(created, identity).await;
        }
        self.close_deferred(outcome, identity).await
    }

    async fn product_created(&self, data: &Value, identity: &Identity) -> SyncResult<Vec<SyncOutcome>> {
        let product = self.merged(EntityType::Product, data).await?;
        let variants = variants_of(&product);
        let parent = self
            .reconciler
            .create(EntityType::Product, &reshape(EntityType::Product, product), identity)
            .await?;

        let children = join_all(
            variants
                .iter()
                .map(|v| self.created(EntityType::ProductVariant, v, identity)),
        )
        .await;
        self.with_children(parent, children, identity).await
    }

    async fn product_updated(&self, data: &Value, identity: &Identity) -> SyncResult<Vec<SyncOutcome>> {
        let parent = self.updated(EntityType::Product, data, identity).await?;
        let variants = variants_of(data);
        let children = join_all(
            variants
                .iter()
                .map(|v| self.updated(EntityType::ProductVariant, v, identity)),
        )
        .await;
        self.with_children(parent, children, identity).await
    }

    async fn with_children(
        &self,
        parent: SyncOutcome,
        children: Vec<SyncResult<SyncOutcome>>,
        identity: &Identity,
    ) -> SyncResult<Vec<SyncOutcome>> {
        let parent = self.close_deferred(parent, identity).await?;
        let mut outcomes = vec![parent];
        for child in children {
            outcomes.push(child?);
        }
        Ok(outcomes)
    }

    /// Sequential product updates for a collection or category membership
    /// change.
    async fn membership_changed(
        &self,
        entity_type: EntityType,
        data: &Value,
        identity: &Identity,
    ) -> SyncResult<Vec<SyncOutcome>> {
        let fields = match entity_type {
            EntityType::ProductCategory => CATEGORY_MEMBERSHIP_FIELDS,
            _ => COLLECTION_MEMBERSHIP_FIELDS,
        };
        let relevant = data
            .as_object()
            .is_some_and(|o| fields.iter().any(|f| o.contains_key(*f)));
        if !relevant {
            let id = data.get(LOCAL_ID_FIELD).and_then(LocalId::from_json);
            return Ok(vec![SyncOutcome::new(
                SyncStatus::NotRelevant,
                entity_type,
                id.as_ref().map(LocalId::as_str),
            )]);
        }

        let product_ids: Vec<LocalId> = data
            .get("productIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(LocalId::from_json).collect())
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let Some(product) = self.catalog.retrieve(EntityType::Product, product_id.as_str()).await? else {
                debug!(id = %product_id, "product gone, skipping");
                continue;
            };
            let payload = reshape(EntityType::Product, product);
            outcomes.push(
                self.reconciler
                    .update_or_create(EntityType::Product, &payload, identity)
                    .await?,
            );
        }
        Ok(outcomes)
    }

    /// Replays references the write had to drop, now that the entity exists.
    async fn close_deferred(&self, mut outcome: SyncOutcome, identity: &Identity) -> SyncResult<SyncOutcome> {
        if !outcome.deferred.is_empty() {
            let deferred = std::mem::take(&mut outcome.deferred);
            outcome.deferred = self.reconciler.reattach(deferred, identity).await;
        }
        Ok(outcome)
    }
}

fn event_id(data: &Value) -> SyncResult<LocalId> {
    data.get(LOCAL_ID_FIELD)
        .and_then(LocalId::from_json)
        .ok_or_else(|| SyncError::ValidationConflict("event without id".into()))
}

/// Changed fields of an update event: the explicit `fields` list when
/// present, the payload keys otherwise.
fn changed_fields(data: &Value) -> Vec<String> {
    if let Some(fields) = data.get(CHANGED_FIELDS_KEY).and_then(Value::as_array) {
        return fields
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    data.as_object()
        .map(|o| o.keys().filter(|k| *k != LOCAL_ID_FIELD).cloned().collect())
        .unwrap_or_default()
}

fn variants_of(product: &Value) -> Vec<Value> {
    product
        .get("variants")
        .and_then(Value::as_array)
        .map(|vs| vs.iter().filter(|v| v.get(LOCAL_ID_FIELD).is_some()).cloned().collect())
        .unwrap_or_default()
}
