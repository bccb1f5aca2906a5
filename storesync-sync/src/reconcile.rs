//! Create/read/update/delete against the content system.
//!
//! Public operations never let transport failures escape: they come back as
//! a [`SyncOutcome`] with a status. Only failures while resolving nested
//! entities (schema errors, transport errors mid-resolution) are returned as
//! `Err`, because a half-resolved payload must not be written.

use crate::content::{ContentStore, SyncCommand};
use crate::echo::EchoSuppressor;
use crate::error::{SyncError, SyncResult};
use crate::schema::{EntitySchema, RelationKind};
use crate::translate::{FieldKind, Translator, classify, field_filter};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use storesync_types::{EntityType, ForeignId, Identity, JOIN_KEY, LOCAL_ID_FIELD, LocalId, SyncDirection};
use tracing::{debug, error, info, warn};

/// Result class of a reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Read or update succeeded.
    Ok,
    /// A new record was created.
    Created,
    /// `create` found the record already present and returned it.
    AlreadyExists,
    /// An echo marker was set; nothing was done.
    Suppressed,
    /// None of the changed fields matter to the content system.
    NotRelevant,
    NotFound,
    /// The existence check before an update failed, so the outcome is unknown.
    Inconclusive,
    /// The remote rejected the call or could not be reached.
    Failed(u16),
}

impl SyncStatus {
    /// HTTP-style code reported for this status.
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Created => 201,
            Self::AlreadyExists => 302,
            Self::Suppressed | Self::NotRelevant => 204,
            Self::NotFound => 404,
            Self::Inconclusive => 520,
            Self::Failed(code) => *code,
        }
    }

    /// Whether the content system is known to be in the intended state.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::Created | Self::AlreadyExists | Self::Suppressed | Self::NotRelevant
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(code) => write!(f, "failed({code})"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// A many-to-one reference dropped because its target did not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRelation {
    pub entity_type: EntityType,
    /// Join-key value of the entity missing the reference.
    pub entity_id: String,
    /// Scalar foreign-key field that was dropped.
    pub foreign_key: String,
    /// Relation field to set once the target exists.
    pub relation_key: String,
    pub target: EntityType,
    pub target_id: String,
}

/// Result of a public reconciliation operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub entity_type: EntityType,
    pub id: Option<LocalId>,
    pub foreign_id: Option<ForeignId>,
    pub payload: Option<Value>,
    pub meta: Option<Value>,
    /// References to re-attach once their targets exist.
    pub deferred: Vec<DeferredRelation>,
}

impl SyncOutcome {
    pub fn new(status: SyncStatus, entity_type: EntityType, id: Option<&str>) -> Self {
        Self {
            status,
            entity_type,
            id: id.map(LocalId::new),
            foreign_id: None,
            payload: None,
            meta: None,
            deferred: Vec::new(),
        }
    }

    fn with_payload(mut self, payload: Value) -> Self {
        self.foreign_id = payload
            .as_object()
            .and_then(|o| o.get(LOCAL_ID_FIELD))
            .and_then(ForeignId::from_json);
        self.payload = Some(payload);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Mutable state threaded through one nested resolution.
struct Resolution<'a> {
    identity: &'a Identity,
    stack: Vec<(EntityType, String)>,
    deferred: Vec<DeferredRelation>,
}

/// A downstream entity embedded in a parent payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedChild {
    pub entity_type: EntityType,
    pub record: Map<String, Value>,
}

/// Payload with every upstream nested entity replaced by a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedResolution {
    pub payload: Value,
    /// Written after the parent.
    pub children: Vec<NestedChild>,
    pub deferred: Vec<DeferredRelation>,
}

/// The reconciliation engine.
pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    translator: Translator,
    echo: EchoSuppressor,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>, translator: Translator, echo: EchoSuppressor) -> Self {
        Self {
            store,
            translator,
            echo,
        }
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn echo(&self) -> &EchoSuppressor {
        &self.echo
    }

    fn schema(&self, entity_type: EntityType) -> SyncResult<&EntitySchema> {
        self.translator.schemas().schema(entity_type)
    }

    fn failed(entity_type: EntityType, id: Option<&str>, op: &str, err: &SyncError) -> SyncOutcome {
        error!(%entity_type, id = id.unwrap_or(""), op, error = %err, "content operation failed");
        SyncOutcome::new(SyncStatus::Failed(err.status()), entity_type, id)
    }

    // ── Public operations ────────────────────────────────────────

    /// Creates an entity unless one with the same id already exists.
    /// `payload` is in commerce format.
    pub async fn create(
        &self,
        entity_type: EntityType,
        payload: &Value,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        let id = payload
            .get(LOCAL_ID_FIELD)
            .and_then(LocalId::from_json)
            .map(|id| id.to_string());
        let id = id.as_deref();

        if let Some(id) = id {
            let lookup = SyncCommand::get(entity_type, identity.clone()).with_id(id);
            match self.store.execute(&lookup).await {
                Ok(resp) => {
                    if let Some(existing) = resp.records().into_iter().next() {
                        debug!(%entity_type, id, "already exists");
                        return Ok(SyncOutcome::new(SyncStatus::AlreadyExists, entity_type, Some(id))
                            .with_payload(existing));
                    }
                }
                Err(e) if e.is_not_found() => {}
                // Lookup failures do not block the create.
                Err(e) => warn!(%entity_type, id, error = %e, "existence check failed"),
            }
        }

        let outbound = self.translator.outbound(Some(entity_type), payload);
        let resolved = self.reconcile_nested(entity_type, &outbound, identity).await?;

        let NestedResolution {
            payload: body,
            children,
            mut deferred,
        } = resolved;
        let command = SyncCommand::post(entity_type, identity.clone(), body.clone());
        match self.store.execute(&command).await {
            Ok(resp) => {
                info!(%entity_type, id = id.unwrap_or(""), "created");
                deferred.extend(self.write_children(entity_type, &body, children, identity).await);
                let mut outcome = SyncOutcome::new(SyncStatus::Created, entity_type, id)
                    .with_payload(resp.data);
                outcome.foreign_id = resp.id.or(outcome.foreign_id);
                outcome.deferred = deferred;
                Ok(outcome)
            }
            Err(e) => Ok(Self::failed(entity_type, id, "create", &e)),
        }
    }

    /// Reads records. The payload is always an array.
    pub async fn read(
        &self,
        entity_type: EntityType,
        id: Option<&str>,
        query: Option<&str>,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        let mut command = SyncCommand::get(entity_type, identity.clone());
        command.id = id.map(str::to_string);
        command.query = query.map(str::to_string);

        match self.store.execute(&command).await {
            Ok(resp) => {
                let mut outcome = SyncOutcome::new(SyncStatus::Ok, entity_type, id);
                outcome.payload = Some(Value::Array(resp.records()));
                outcome.meta = resp.meta;
                Ok(outcome)
            }
            Err(e) if e.is_not_found() => {
                let mut outcome = SyncOutcome::new(SyncStatus::NotFound, entity_type, id);
                outcome.payload = Some(Value::Array(Vec::new()));
                Ok(outcome)
            }
            Err(e) => Ok(Self::failed(entity_type, id, "read", &e)),
        }
    }

    /// Updates an existing entity. `payload` is in commerce format.
    pub async fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Value,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        if self.echo.is_ignored(id, SyncDirection::ToContent).await {
            debug!(%entity_type, id, "update suppressed");
            return Ok(SyncOutcome::new(SyncStatus::Suppressed, entity_type, Some(id)));
        }

        let lookup = SyncCommand::get(entity_type, identity.clone()).with_id(id);
        match self.store.execute(&lookup).await {
            Ok(resp) if !resp.records().is_empty() => {}
            Ok(_) => return Ok(SyncOutcome::new(SyncStatus::NotFound, entity_type, Some(id))),
            Err(e) if e.is_not_found() => {
                debug!(%entity_type, id, "update target missing");
                return Ok(SyncOutcome::new(SyncStatus::NotFound, entity_type, Some(id)));
            }
            Err(e) => {
                warn!(%entity_type, id, error = %e, "existence check failed, update skipped");
                return Ok(SyncOutcome::new(SyncStatus::Inconclusive, entity_type, Some(id)));
            }
        }

        let outbound = self.translator.outbound(Some(entity_type), payload);
        let resolved = self.reconcile_nested(entity_type, &outbound, identity).await?;

        let NestedResolution {
            payload: body,
            children,
            mut deferred,
        } = resolved;
        let command = SyncCommand::put(entity_type, identity.clone(), id, body.clone());
        match self.store.execute(&command).await {
            Ok(resp) => {
                info!(%entity_type, id, "updated");
                deferred.extend(self.write_children(entity_type, &body, children, identity).await);
                let mut outcome =
                    SyncOutcome::new(SyncStatus::Ok, entity_type, Some(id)).with_payload(resp.data);
                outcome.deferred = deferred;
                Ok(outcome)
            }
            Err(e) if e.is_not_found() => {
                Ok(SyncOutcome::new(SyncStatus::NotFound, entity_type, Some(id)))
            }
            Err(e) => Ok(Self::failed(entity_type, Some(id), "update", &e)),
        }
    }

    /// Update driven by a partial change notification: skipped unless one
    /// of `changed` is on the type's update allow-list.
    pub async fn update_changed(
        &self,
        entity_type: EntityType,
        id: &str,
        payload: &Value,
        changed: &[String],
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        if self.echo.is_ignored(id, SyncDirection::ToContent).await {
            debug!(%entity_type, id, "update suppressed");
            return Ok(SyncOutcome::new(SyncStatus::Suppressed, entity_type, Some(id)));
        }
        if !self.is_relevant(entity_type, changed)? {
            debug!(%entity_type, id, ?changed, "no relevant fields changed");
            return Ok(SyncOutcome::new(SyncStatus::NotRelevant, entity_type, Some(id)));
        }
        self.update(entity_type, id, payload, identity).await
    }

    /// Whether any of `changed` is on the type's update allow-list.
    pub fn is_relevant(&self, entity_type: EntityType, changed: &[String]) -> SyncResult<bool> {
        Ok(self
            .schema(entity_type)?
            .is_relevant_change(changed.iter().map(String::as_str)))
    }

    /// Updates, falling back to create when the target is missing.
    pub async fn update_or_create(
        &self,
        entity_type: EntityType,
        payload: &Value,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        let Some(id) = payload.get(LOCAL_ID_FIELD).and_then(LocalId::from_json) else {
            return self.create(entity_type, payload, identity).await;
        };
        let outcome = self.update(entity_type, id.as_str(), payload, identity).await?;
        if outcome.status == SyncStatus::NotFound {
            info!(%entity_type, id = %id, "update target missing, creating instead");
            return self.create(entity_type, payload, identity).await;
        }
        Ok(outcome)
    }

    /// Deletes an entity by commerce id.
    pub async fn delete(
        &self,
        entity_type: EntityType,
        id: &str,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        if self.echo.is_ignored(id, SyncDirection::ToContent).await {
            debug!(%entity_type, id, "delete suppressed");
            return Ok(SyncOutcome::new(SyncStatus::Suppressed, entity_type, Some(id)));
        }

        let command = SyncCommand::delete(entity_type, identity.clone(), id);
        match self.store.execute(&command).await {
            Ok(resp) => {
                info!(%entity_type, id, "deleted");
                Ok(SyncOutcome::new(SyncStatus::Ok, entity_type, Some(id)).with_payload(resp.data))
            }
            Err(e) if e.is_not_found() => {
                Ok(SyncOutcome::new(SyncStatus::NotFound, entity_type, Some(id)))
            }
            Err(e) => Ok(Self::failed(entity_type, Some(id), "delete", &e)),
        }
    }

    /// Finds the entity by its unique field and updates it, or creates it.
    /// `payload` is already in content format (seed pages).
    pub async fn upsert(
        &self,
        entity_type: EntityType,
        payload: &Value,
        identity: &Identity,
    ) -> SyncResult<SyncOutcome> {
        let Some(map) = payload.as_object() else {
            return Err(SyncError::ValidationConflict(format!(
                "{entity_type} payload is not an object"
            )));
        };
        let join_id = map.get(JOIN_KEY).and_then(LocalId::from_json).map(|id| id.to_string());
        let mut ctx = Resolution {
            identity,
            stack: Vec::new(),
            deferred: Vec::new(),
        };

        let resolved = self.find_or_create(entity_type, map, &mut ctx).await?;
        let mut outcome = match resolved {
            Some((foreign_id, status)) => {
                let mut outcome = SyncOutcome::new(status, entity_type, join_id.as_deref());
                outcome.foreign_id = Some(foreign_id);
                outcome
            }
            None => SyncOutcome::new(SyncStatus::Failed(400), entity_type, join_id.as_deref()),
        };
        outcome.deferred = ctx.deferred;
        Ok(outcome)
    }

    // ── Nested resolution ────────────────────────────────────────

    /// Replaces every upstream nested entity in a content-format payload with
    /// a reference to its content-system id, finding or creating each one
    /// first. Relations are visited upstream types first.
    ///
    /// Downstream entities (variants of a product) are removed and returned
    /// as children, to be written once the parent exists. Foreign-key fields
    /// whose target does not exist yet are dropped and reported as deferred.
    pub async fn reconcile_nested(
        &self,
        entity_type: EntityType,
        payload: &Value,
        identity: &Identity,
    ) -> SyncResult<NestedResolution> {
        let Some(map) = payload.as_object() else {
            return Ok(NestedResolution {
                payload: payload.clone(),
                children: Vec::new(),
                deferred: Vec::new(),
            });
        };
        let mut ctx = Resolution {
            identity,
            stack: Vec::new(),
            deferred: Vec::new(),
        };
        if let Some(id) = map.get(JOIN_KEY).and_then(LocalId::from_json) {
            ctx.stack.push((entity_type, id.to_string()));
        }
        let (resolved, children) = self.resolve_relations(entity_type, map.clone(), &mut ctx).await?;
        Ok(NestedResolution {
            payload: Value::Object(resolved),
            children,
            deferred: ctx.deferred,
        })
    }

    /// Writes the children of a parent that now exists. Failures are logged
    /// per child. Returns references deferred along the way.
    pub async fn write_children(
        &self,
        parent_type: EntityType,
        parent: &Value,
        children: Vec<NestedChild>,
        identity: &Identity,
    ) -> Vec<DeferredRelation> {
        let mut ctx = Resolution {
            identity,
            stack: Vec::new(),
            deferred: Vec::new(),
        };
        let parent_id = parent.get(JOIN_KEY).and_then(LocalId::from_json);
        self.write_children_in(parent_type, parent_id.as_ref(), children, &mut ctx)
            .await;
        ctx.deferred
    }

    async fn write_children_in(
        &self,
        parent_type: EntityType,
        parent_id: Option<&LocalId>,
        children: Vec<NestedChild>,
        ctx: &mut Resolution<'_>,
    ) {
        for child in children {
            let NestedChild {
                entity_type,
                mut record,
            } = child;
            // Link back to the parent through the child's own foreign key.
            let back_link = self.translator.schemas().get(entity_type).and_then(|schema| {
                schema
                    .relations
                    .iter()
                    .find(|r| r.target == parent_type && r.kind == RelationKind::ManyToOne)
                    .and_then(|r| r.foreign_key.clone())
            });
            if let (Some(fk), Some(parent_id)) = (back_link, parent_id) {
                record
                    .entry(fk)
                    .or_insert_with(|| Value::String(parent_id.to_string()));
            }
            if let Err(e) = self.find_or_create(entity_type, &record, ctx).await {
                error!(%entity_type, parent = %parent_type, error = %e, "child entity not written");
            }
        }
    }

    fn resolve_relations<'a>(
        &'a self,
        entity_type: EntityType,
        mut map: Map<String, Value>,
        ctx: &'a mut Resolution<'_>,
    ) -> BoxFuture<'a, SyncResult<(Map<String, Value>, Vec<NestedChild>)>> {
        async move {
            let schema = self.schema(entity_type)?;
            let schemas = self.translator.schemas();
            let own_rank = schemas.rank(entity_type);
            let entity_id = map.get(JOIN_KEY).and_then(LocalId::from_json);
            let mut children = Vec::new();

            let mut fields: Vec<(String, FieldKind)> = map
                .iter()
                .map(|(k, v)| (k.clone(), classify(Some(schema), k, v)))
                .filter(|(_, kind)| kind.is_relation())
                .collect();
            fields.sort_by_key(|(_, kind)| kind.target().map(|t| schemas.rank(t)).unwrap_or(usize::MAX));

            for (key, kind) in fields {
                let Some(value) = map.remove(&key) else { continue };
                let downstream = kind
                    .target()
                    .is_some_and(|t| t != entity_type && schemas.rank(t) > own_rank);

                match kind {
                    FieldKind::NestedEntity(t) | FieldKind::RelationCollection(t) if downstream => {
                        let Some(target) = t.target else { continue };
                        let items = match value {
                            Value::Array(items) => items,
                            other => vec![other],
                        };
                        children.extend(items.into_iter().filter_map(|item| match item {
                            Value::Object(record) => Some(NestedChild {
                                entity_type: target,
                                record,
                            }),
                            _ => None,
                        }));
                    }
                    FieldKind::NestedEntity(t) => {
                        let (Some(target), Some(obj)) = (t.target, value.as_object()) else {
                            map.insert(key, value);
                            continue;
                        };
                        if let Some((foreign_id, _)) = self.find_or_create(target, obj, ctx).await? {
                            map.insert(key, foreign_id.to_json());
                        }
                    }
                    FieldKind::RelationCollection(t) => {
                        let (Some(target), Value::Array(items)) = (t.target, &value) else {
                            map.insert(key, value);
                            continue;
                        };
                        let mut refs = Vec::with_capacity(items.len());
                        for item in items {
                            match item.as_object() {
                                Some(obj) => {
                                    if let Some((foreign_id, _)) =
                                        self.find_or_create(target, obj, ctx).await?
                                    {
                                        refs.push(foreign_id.to_json());
                                    }
                                }
                                _ => refs.push(item.clone()),
                            }
                        }
                        map.insert(key, Value::Array(refs));
                    }
                    FieldKind::RelationRef(t) => {
                        let fk = schema
                            .relation_by_foreign_key(&key)
                            .filter(|rel| rel.kind == RelationKind::ManyToOne);
                        let (Some(rel), Some(target)) = (fk, t.target) else {
                            map.insert(key, value);
                            continue;
                        };
                        let Some(target_id) = LocalId::from_json(&value) else {
                            continue;
                        };
                        match self.lookup(target, target_id.as_str(), ctx.identity).await? {
                            Some(foreign_id) => {
                                map.entry(rel.key.clone()).or_insert(foreign_id.to_json());
                                map.insert(key, value);
                            }
                            None => {
                                debug!(%entity_type, field = %key, target_id = %target_id, "deferring reference");
                                if let Some(entity_id) = &entity_id {
                                    ctx.deferred.push(DeferredRelation {
                                        entity_type,
                                        entity_id: entity_id.to_string(),
                                        foreign_key: key.clone(),
                                        relation_key: rel.key.clone(),
                                        target,
                                        target_id: target_id.to_string(),
                                    });
                                }
                            }
                        }
                    }
                    FieldKind::Scalar => {
                        map.insert(key, value);
                    }
                }
            }
            Ok((map, children))
        }
        .boxed()
    }

    /// Content-system id of the record whose join key is `id`.
    async fn lookup(&self, entity_type: EntityType, id: &str, identity: &Identity) -> SyncResult<Option<ForeignId>> {
        let command = SyncCommand::get(entity_type, identity.clone()).with_id(id);
        match self.store.execute(&command).await {
            Ok(resp) => Ok(resp
                .records()
                .first()
                .and_then(|r| r.get(LOCAL_ID_FIELD))
                .and_then(ForeignId::from_json)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Finds an entity by its unique field, updating it when found by join
    /// key, or creates it. Returns its content-system id.
    fn find_or_create<'a>(
        &'a self,
        entity_type: EntityType,
        obj: &'a Map<String, Value>,
        ctx: &'a mut Resolution<'_>,
    ) -> BoxFuture<'a, SyncResult<Option<(ForeignId, SyncStatus)>>> {
        async move {
            let unique_field = self.schema(entity_type)?.unique_field.clone();
            let Some(unique) = obj.get(&unique_field).and_then(LocalId::from_json) else {
                warn!(%entity_type, field = %unique_field, "nested entity has no unique value");
                return Ok(None);
            };
            let frame = (entity_type, unique.to_string());
            if ctx.stack.contains(&frame) {
                debug!(%entity_type, unique = %unique, "reference cycle, skipping");
                return Ok(None);
            }

            ctx.stack.push(frame);
            let resolved = self.resolve_relations(entity_type, obj.clone(), ctx).await;
            ctx.stack.pop();
            let (mut resolved, children) = resolved?;
            resolved.insert(unique_field.clone(), Value::String(unique.to_string()));

            let by_join_key = unique_field == JOIN_KEY;
            let existing = if by_join_key {
                self.lookup(entity_type, unique.as_str(), ctx.identity).await?
            } else {
                let command = SyncCommand::get(entity_type, ctx.identity.clone())
                    .with_query(field_filter(&unique_field, unique.as_str()));
                match self.store.execute(&command).await {
                    Ok(resp) => resp
                        .records()
                        .first()
                        .and_then(|r| r.get(LOCAL_ID_FIELD))
                        .and_then(ForeignId::from_json),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                }
            };

            let result = match existing {
                Some(foreign_id) => {
                    if by_join_key {
                        let command = SyncCommand::put(
                            entity_type,
                            ctx.identity.clone(),
                            unique.as_str(),
                            Value::Object(resolved),
                        );
                        if let Err(e) = self.store.execute(&command).await {
                            warn!(%entity_type, id = %unique, error = %e, "refreshing nested entity failed");
                        }
                    }
                    (foreign_id, SyncStatus::Ok)
                }
                None => {
                    let command =
                        SyncCommand::post(entity_type, ctx.identity.clone(), Value::Object(resolved));
                    let resp = self.store.execute(&command).await?;
                    let foreign_id = resp.id.ok_or_else(|| SyncError::Http {
                        status: resp.status,
                        body: format!("create of {entity_type} {unique} returned no id"),
                    })?;
                    debug!(%entity_type, unique = %unique, foreign_id = %foreign_id, "nested entity created");
                    (foreign_id, SyncStatus::Created)
                }
            };

            let parent_id = by_join_key.then_some(&unique);
            self.write_children_in(entity_type, parent_id, children, ctx).await;
            Ok(Some(result))
        }
        .boxed()
    }

    // ── Deferred references ──────────────────────────────────────

    /// Re-attaches deferred references whose targets now exist. Returns the
    /// ones that still cannot be resolved.
    pub async fn reattach(
        &self,
        deferred: Vec<DeferredRelation>,
        identity: &Identity,
    ) -> Vec<DeferredRelation> {
        let mut remaining = Vec::new();
        for rel in deferred {
            let target = match self.lookup(rel.target, &rel.target_id, identity).await {
                Ok(target) => target,
                Err(e) => {
                    warn!(target = %rel.target, id = %rel.target_id, error = %e, "reattach lookup failed");
                    None
                }
            };
            let Some(target) = target else {
                remaining.push(rel);
                continue;
            };

            let mut changes = Map::new();
            changes.insert(rel.foreign_key.clone(), Value::String(rel.target_id.clone()));
            changes.insert(rel.relation_key.clone(), target.to_json());
            let command = SyncCommand::put(
                rel.entity_type,
                identity.clone(),
                &rel.entity_id,
                Value::Object(changes),
            );
            match self.store.execute(&command).await {
                Ok(_) => debug!(
                    entity_type = %rel.entity_type,
                    id = %rel.entity_id,
                    field = %rel.relation_key,
                    "reference re-attached"
                ),
                Err(e) => {
                    warn!(entity_type = %rel.entity_type, id = %rel.entity_id, error = %e, "reattach failed");
                    remaining.push(rel);
                }
            }
        }
        remaining
    }
}
