//! Identifier and relation-key translation between the two systems.
//!
//! Every field of an entity is classified into a [`FieldKind`] before it is
//! rewritten. Classification consults the entity type's declared relations
//! first; only keys the schema does not know fall back to looking at the
//! value's shape (an object carrying an identifier is an entity).

use crate::error::{SyncError, SyncResult};
use crate::schema::{EntitySchema, RelationKind, SchemaRegistry};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use storesync_types::{EntityType, JOIN_KEY, LOCAL_ID_FIELD};

/// Audit fields the commerce system manages; never sent out.
const OUTBOUND_SYSTEM_FIELDS: &[&str] = &["created_at", "updated_at", "deleted_at"];

/// Bookkeeping fields the content system adds; never brought back.
const INBOUND_SYSTEM_FIELDS: &[&str] = &["createdAt", "updatedAt", "publishedAt"];

/// What a relation field points at, as far as it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationTarget {
    pub target: Option<EntityType>,
    pub kind: Option<RelationKind>,
}

/// Classification of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain data, copied as is.
    Scalar,
    /// A bare identifier of a related entity (`collection_id: "pcol_1"`).
    RelationRef(RelationTarget),
    /// An array of related entities or identifiers.
    RelationCollection(RelationTarget),
    /// A single embedded related entity.
    NestedEntity(RelationTarget),
}

impl FieldKind {
    pub fn is_relation(&self) -> bool {
        !matches!(self, Self::Scalar)
    }

    pub fn target(&self) -> Option<EntityType> {
        match self {
            Self::Scalar => None,
            Self::RelationRef(t) | Self::RelationCollection(t) | Self::NestedEntity(t) => t.target,
        }
    }
}

/// Whether a JSON value looks like an entity (an object carrying either
/// system's identifier).
pub fn is_entity(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key(LOCAL_ID_FIELD) || o.contains_key(JOIN_KEY))
}

fn is_id_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_))
}

/// Classifies `key: value` on an entity of the given schema.
pub fn classify(schema: Option<&EntitySchema>, key: &str, value: &Value) -> FieldKind {
    if let Some(schema) = schema {
        if let Some(rel) = schema.relation_for(key) {
            let target = RelationTarget {
                target: Some(rel.target),
                kind: Some(rel.kind),
            };
            return match value {
                Value::Array(_) => FieldKind::RelationCollection(target),
                // Declared relations may embed entities keyed by another
                // unique field (currencies by code).
                Value::Object(_) => FieldKind::NestedEntity(target),
                v if is_id_scalar(v) => FieldKind::RelationRef(target),
                _ => FieldKind::Scalar,
            };
        }
        if let Some(rel) = schema.relation_by_foreign_key(key) {
            if is_id_scalar(value) {
                return FieldKind::RelationRef(RelationTarget {
                    target: Some(rel.target),
                    kind: Some(rel.kind),
                });
            }
        }
    }

    // Undeclared key: judge by shape.
    let guessed = RelationTarget {
        target: EntityType::from_relation_key(key),
        kind: None,
    };
    match value {
        Value::Array(items) if items.first().is_some_and(is_entity) => {
            FieldKind::RelationCollection(guessed)
        }
        v if is_entity(v) => FieldKind::NestedEntity(guessed),
        _ => FieldKind::Scalar,
    }
}

/// Bidirectional entity rewriter.
#[derive(Debug, Clone)]
pub struct Translator {
    schemas: Arc<SchemaRegistry>,
    remaps: HashMap<EntityType, HashMap<String, String>>,
}

impl Translator {
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            remaps: HashMap::new(),
        }
    }

    /// Per-type field renames (local name → content name).
    pub fn with_remaps(mut self, remaps: HashMap<EntityType, HashMap<String, String>>) -> Self {
        self.remaps = remaps;
        self
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Local → content format.
    pub fn outbound(&self, entity_type: Option<EntityType>, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.outbound_object(entity_type, map)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.outbound(entity_type, item))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn outbound_object(&self, entity_type: Option<EntityType>, map: &Map<String, Value>) -> Map<String, Value> {
        let entity = map.contains_key(LOCAL_ID_FIELD) || map.contains_key(JOIN_KEY);
        let schema = entity_type.and_then(|t| self.schemas.get(t));
        let remap = entity_type.and_then(|t| self.remaps.get(&t));
        let mut out = Map::with_capacity(map.len());

        for (key, value) in map {
            if entity && key == LOCAL_ID_FIELD {
                out.insert(JOIN_KEY.to_string(), value.clone());
                continue;
            }
            if key == JOIN_KEY && map.contains_key(LOCAL_ID_FIELD) {
                continue;
            }
            if entity && OUTBOUND_SYSTEM_FIELDS.contains(&key.as_str()) {
                continue;
            }

            match classify(schema, key, value) {
                FieldKind::Scalar | FieldKind::RelationRef(_) => {
                    let name = remap
                        .and_then(|r| r.get(key))
                        .cloned()
                        .unwrap_or_else(|| key.clone());
                    out.insert(name, value.clone());
                }
                FieldKind::NestedEntity(t) | FieldKind::RelationCollection(t) => {
                    out.insert(key.replace('-', "_"), self.outbound_relation(t.target, value));
                }
            }
        }
        out
    }

    fn outbound_relation(&self, target: Option<EntityType>, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) if is_entity(item) => {
                            Value::Object(self.outbound_object(target, map))
                        }
                        other => other.clone(),
                    })
                    .collect(),
            ),
            Value::Object(map) => Value::Object(self.outbound_object(target, map)),
            other => other.clone(),
        }
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Content → local format.
    pub fn inbound(&self, entity_type: Option<EntityType>, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.inbound_object(entity_type, map)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.inbound(entity_type, item))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn inbound_object(&self, entity_type: Option<EntityType>, map: &Map<String, Value>) -> Map<String, Value> {
        let entity = map.contains_key(LOCAL_ID_FIELD) || map.contains_key(JOIN_KEY);
        let schema = entity_type.and_then(|t| self.schemas.get(t));
        let remap = entity_type.and_then(|t| self.remaps.get(&t));
        let mut out = Map::with_capacity(map.len());

        for (key, value) in map {
            if key == JOIN_KEY {
                out.insert(LOCAL_ID_FIELD.to_string(), value.clone());
                continue;
            }
            // The content system's own id has no meaning locally.
            if entity && key == LOCAL_ID_FIELD {
                continue;
            }
            if entity && INBOUND_SYSTEM_FIELDS.contains(&key.as_str()) {
                continue;
            }

            match classify(schema, key, value) {
                FieldKind::Scalar | FieldKind::RelationRef(_) => {
                    let name = remap
                        .and_then(|r| r.iter().find(|(_, content)| *content == key))
                        .map(|(local, _)| local.clone())
                        .unwrap_or_else(|| key.clone());
                    out.insert(name, value.clone());
                }
                FieldKind::NestedEntity(t) | FieldKind::RelationCollection(t) => {
                    out.insert(key.replace('_', "-"), self.inbound_relation(t.target, value));
                }
            }
        }
        out
    }

    fn inbound_relation(&self, target: Option<EntityType>, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) if is_entity(item) => {
                            Value::Object(self.inbound_object(target, map))
                        }
                        other => other.clone(),
                    })
                    .collect(),
            ),
            Value::Object(map) => Value::Object(self.inbound_object(target, map)),
            other => other.clone(),
        }
    }
}

// ── Lookup filters ──────────────────────────────────────────────

const FILTER_ID: &str = "filters[id]";
const FILTER_JOIN: &str = "filters[medusa_id]";

/// Splits and percent-decodes a query string.
pub fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(&s.replace('+', " "))
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            (decode(k), decode(v))
        })
        .collect()
}

fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Merges an explicit identifier into a query string as a join-key filter.
///
/// An identifier may come from `id` or from an existing `filters[id]` /
/// `filters[medusa_id]` entry, never both.
pub fn build_lookup_filter(id: Option<&str>, query: Option<&str>) -> SyncResult<Option<String>> {
    let mut pairs = query.map(query_pairs).unwrap_or_default();
    let from_filter = pairs
        .iter()
        .find(|(k, _)| k == FILTER_JOIN)
        .or_else(|| pairs.iter().find(|(k, _)| k == FILTER_ID))
        .map(|(_, v)| v.clone());

    if id.is_some() && from_filter.is_some() {
        return Err(SyncError::ValidationConflict(
            "multiple ids in request".into(),
        ));
    }

    let Some(resolved) = id.map(str::to_string).or(from_filter) else {
        return Ok(query.filter(|q| !q.is_empty()).map(str::to_string));
    };

    pairs.retain(|(k, _)| k != FILTER_ID && k != FILTER_JOIN);
    pairs.push((FILTER_JOIN.to_string(), resolved));
    Ok(Some(encode_query(&pairs)))
}

/// Query matching records whose `field` equals `value`.
pub fn field_filter(field: &str, value: &str) -> String {
    encode_query(&[(format!("filters[{field}]"), value.to_string())])
}
