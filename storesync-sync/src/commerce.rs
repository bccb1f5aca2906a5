//! Read/write access to the commerce system of record.
//!
//! The engine only needs three things from the commerce side: fetch one
//! entity with its relations, page through a collection, and apply a change
//! coming back from the content system.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use serde_json::Value;
use storesync_types::EntityType;

#[async_trait]
pub trait CommerceCatalog: Send + Sync {
    /// Fetches one entity with its relations expanded, `None` if missing.
    async fn retrieve(&self, entity_type: EntityType, id: &str) -> SyncResult<Option<Value>>;

    /// Lists a page of a collection in a stable order.
    async fn list(&self, entity_type: EntityType, skip: usize, take: usize) -> SyncResult<Vec<Value>>;

    /// Applies field changes to an existing entity and returns it.
    async fn apply_update(&self, entity_type: EntityType, id: &str, changes: &Value) -> SyncResult<Value>;
}

/// Catalog held in memory, for tests and local runs.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard};

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        match m.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[derive(Default)]
    pub struct MemoryCatalog {
        entities: Mutex<HashMap<EntityType, Vec<Value>>>,
        updates: Mutex<Vec<(EntityType, String, Value)>>,
    }

    impl MemoryCatalog {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, entity_type: EntityType, entity: Value) {
            lock(&self.entities).entry(entity_type).or_default().push(entity);
        }

        /// Inserts `count` entities with ids `{prefix}_{n}`.
        pub fn fill(&self, entity_type: EntityType, prefix: &str, count: usize) {
            for n in 1..=count {
                self.insert(entity_type, serde_json::json!({ "id": format!("{prefix}_{n}") }));
            }
        }

        /// Every update applied so far, in order.
        pub fn updates(&self) -> Vec<(EntityType, String, Value)> {
            lock(&self.updates).clone()
        }

        pub fn get(&self, entity_type: EntityType, id: &str) -> Option<Value> {
            lock(&self.entities)
                .get(&entity_type)
                .and_then(|es| es.iter().find(|e| has_id(e, id)).cloned())
        }
    }

    fn has_id(entity: &Value, id: &str) -> bool {
        entity.get("id").and_then(Value::as_str) == Some(id)
    }

    #[async_trait]
    impl CommerceCatalog for MemoryCatalog {
        async fn retrieve(&self, entity_type: EntityType, id: &str) -> SyncResult<Option<Value>> {
            Ok(self.get(entity_type, id))
        }

        async fn list(&self, entity_type: EntityType, skip: usize, take: usize) -> SyncResult<Vec<Value>> {
            Ok(lock(&self.entities)
                .get(&entity_type)
                .map(|es| es.iter().skip(skip).take(take).cloned().collect())
                .unwrap_or_default())
        }

        async fn apply_update(&self, entity_type: EntityType, id: &str, changes: &Value) -> SyncResult<Value> {
            let mut entities = lock(&self.entities);
            let entity = entities
                .get_mut(&entity_type)
                .and_then(|es| es.iter_mut().find(|e| has_id(e, id)))
                .ok_or_else(|| SyncError::NotFound(format!("{entity_type} {id}")))?;
            if let (Some(target), Some(changes)) = (entity.as_object_mut(), changes.as_object()) {
                for (k, v) in changes {
                    if k != "id" {
                        target.insert(k.clone(), v.clone());
                    }
                }
            }
            let updated = entity.clone();
            drop(entities);
            lock(&self.updates).push((entity_type, id.to_string(), changes.clone()));
            Ok(updated)
        }
    }
}
