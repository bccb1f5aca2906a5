//! Access to the content system.
//!
//! [`ContentStore`] is the single seam through which the engine talks to the
//! content side. The REST implementation gates every call on remote health
//! and the service-account barrier, authenticates with the command's
//! identity, re-logs in once on a 401 and retries rate-limited calls.

use crate::coordinator::SyncCoordinator;
use crate::credentials::CredentialStore;
use crate::error::{SyncError, SyncResult};
use crate::health::HealthGate;
use crate::http::check_response;
use crate::retry::RetryLayer;
use crate::translate::build_lookup_filter;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use storesync_types::{EntityType, ForeignId, Identity, JOIN_KEY, LocalId};
use tracing::{debug, error, warn};

/// HTTP verb of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

/// One unit of work against the content system.
#[derive(Debug, Clone)]
pub struct SyncCommand {
    pub method: Method,
    pub entity_type: EntityType,
    /// Join-key value (the commerce id) addressed by the command.
    pub id: Option<String>,
    pub payload: Option<Value>,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub identity: Identity,
}

impl SyncCommand {
    pub fn new(method: Method, entity_type: EntityType, identity: Identity) -> Self {
        Self {
            method,
            entity_type,
            id: None,
            payload: None,
            query: None,
            identity,
        }
    }

    pub fn get(entity_type: EntityType, identity: Identity) -> Self {
        Self::new(Method::Get, entity_type, identity)
    }

    pub fn post(entity_type: EntityType, identity: Identity, payload: Value) -> Self {
        Self::new(Method::Post, entity_type, identity).with_payload(payload)
    }

    pub fn put(entity_type: EntityType, identity: Identity, id: &str, payload: Value) -> Self {
        Self::new(Method::Put, entity_type, identity)
            .with_id(id)
            .with_payload(payload)
    }

    pub fn delete(entity_type: EntityType, identity: Identity, id: &str) -> Self {
        Self::new(Method::Delete, entity_type, identity).with_id(id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Normalised reply from the content system.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    /// Content-system id of the addressed record, if a single one.
    pub id: Option<ForeignId>,
    /// Join-key value of the addressed record, if a single one.
    pub join_id: Option<LocalId>,
    /// Body with any `data` wrapper removed.
    pub data: Value,
    pub meta: Option<Value>,
}

impl RemoteResponse {
    /// Builds a response from a raw body that may or may not be wrapped in
    /// `{data, meta}`.
    pub fn from_body(status: u16, body: Value) -> Self {
        let (data, meta) = match body {
            Value::Object(mut map) if map.contains_key("data") => {
                let data = map.remove("data").unwrap_or(Value::Null);
                (data, map.remove("meta"))
            }
            other => (other, None),
        };
        let single = data.as_object();
        Self {
            status,
            id: single.and_then(|o| o.get("id")).and_then(ForeignId::from_json),
            join_id: single.and_then(|o| o.get(JOIN_KEY)).and_then(LocalId::from_json),
            data,
            meta,
        }
    }

    /// The payload as a list of records, whatever its shape.
    pub fn records(&self) -> Vec<Value> {
        match &self.data {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }
}

/// Executes commands against the content system.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn execute(&self, command: &SyncCommand) -> SyncResult<RemoteResponse>;
}

// ── REST implementation ─────────────────────────────────────────

/// Talks to the content system's REST API under `{base}/api/{namespace}`.
pub struct RestContentStore {
    client: Client,
    api_url: String,
    credentials: Arc<CredentialStore>,
    health: Arc<HealthGate>,
    coordinator: Arc<SyncCoordinator>,
    retry: RetryLayer,
}

impl RestContentStore {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        health: Arc<HealthGate>,
        coordinator: Arc<SyncCoordinator>,
        retry: RetryLayer,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            credentials,
            health,
            coordinator,
            retry,
        }
    }

    /// Resolves the URL a command is sent to.
    pub fn url_for(&self, command: &SyncCommand) -> SyncResult<String> {
        let base = format!("{}/{}", self.api_url, command.entity_type.as_str());
        let id = command.id.as_deref().map(str::trim).filter(|id| !id.is_empty());
        let query = command.query.as_deref().filter(|q| !q.is_empty());

        let tail = match command.method {
            Method::Post => String::new(),
            Method::Get
                if id.is_some_and(|id| !id.eq_ignore_ascii_case("me"))
                    && command.entity_type != EntityType::User =>
            {
                match build_lookup_filter(id, query)? {
                    Some(q) => format!("?{q}"),
                    None => String::new(),
                }
            }
            _ => match (id, query) {
                (Some(id), _) => format!("/{}", urlencoding::encode(id)),
                (None, Some(q)) => format!("?{q}"),
                (None, None) => String::new(),
            },
        };
        Ok(format!("{base}{tail}"))
    }

    async fn send(
        &self,
        command: &SyncCommand,
        url: &str,
        token: &str,
        attempt: u32,
    ) -> SyncResult<RemoteResponse> {
        let mut request = self
            .client
            .request(command.method.as_reqwest(), url)
            .bearer_auth(token);
        if let Some(payload) = &command.payload {
            request = request.json(payload);
        }

        let resp = request.send().await.map_err(|e| {
            error!(method = %command.method, url, error = %e, "content request failed");
            SyncError::Network(e.to_string())
        })?;
        let resp = check_response(resp, self.retry.config(), attempt).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };

        debug!(
            method = %command.method,
            entity_type = %command.entity_type,
            id = command.id.as_deref().unwrap_or(""),
            status,
            "content request ok"
        );
        Ok(RemoteResponse::from_body(status, body))
    }

    /// One attempt with the cached token, and one more with a fresh token if
    /// the first is rejected.
    async fn send_authorized(&self, command: &SyncCommand, url: &str, attempt: u32) -> SyncResult<RemoteResponse> {
        let token = self.credentials.token(&command.identity).await?;
        match self.send(command, url, &token, attempt).await {
            Err(SyncError::AuthExpired) => {
                warn!(identity = %command.identity.key, "token rejected, logging in again");
                let token = self.credentials.refresh(&command.identity).await?;
                self.send(command, url, &token, attempt).await.map_err(|e| match e {
                    SyncError::AuthExpired => {
                        SyncError::Auth(format!("{} rejected after re-login", command.identity.key))
                    }
                    other => other,
                })
            }
            other => other,
        }
    }
}

#[async_trait]
impl ContentStore for RestContentStore {
    async fn execute(&self, command: &SyncCommand) -> SyncResult<RemoteResponse> {
        self.health.wait_for_health(None).await?;
        self.coordinator.wait_for_service_account(None).await?;

        let url = self.url_for(command)?;
        let op = format!("{} {}", command.method, command.entity_type);
        self.retry
            .execute(&op, |attempt| self.send_authorized(command, &url, attempt))
            .await
    }
}

/// In-memory content store that behaves like the content system's
/// controllers and records every command it receives.
pub mod memory {
    use super::*;
    use crate::translate::query_pairs;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        match m.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[derive(Default)]
    pub struct MemoryContentStore {
        records: Mutex<HashMap<EntityType, Vec<Value>>>,
        calls: Mutex<Vec<SyncCommand>>,
        failures: Mutex<VecDeque<(Method, u16)>>,
        next_id: AtomicU64,
    }

    impl MemoryContentStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a record as if it had been created earlier.
        pub fn insert(&self, entity_type: EntityType, mut record: Value) -> ForeignId {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(obj) = record.as_object_mut() {
                obj.insert("id".into(), Value::from(id));
            }
            lock(&self.records).entry(entity_type).or_default().push(record);
            ForeignId::new(id.to_string())
        }

        /// Makes the next `method` call fail with `status`.
        pub fn fail_next(&self, method: Method, status: u16) {
            lock(&self.failures).push_back((method, status));
        }

        pub fn records(&self, entity_type: EntityType) -> Vec<Value> {
            lock(&self.records).get(&entity_type).cloned().unwrap_or_default()
        }

        /// Finds a record by join key.
        pub fn find(&self, entity_type: EntityType, join_id: &str) -> Option<Value> {
            self.records(entity_type)
                .into_iter()
                .find(|r| matches_field(r, JOIN_KEY, join_id))
        }

        pub fn calls(&self) -> Vec<SyncCommand> {
            lock(&self.calls).clone()
        }

        pub fn call_count(&self) -> usize {
            lock(&self.calls).len()
        }

        pub fn calls_for(&self, method: Method, entity_type: EntityType) -> Vec<SyncCommand> {
            self.calls()
                .into_iter()
                .filter(|c| c.method == method && c.entity_type == entity_type)
                .collect()
        }

        pub fn clear_calls(&self) {
            lock(&self.calls).clear();
        }

        fn take_failure(&self, method: Method) -> Option<SyncError> {
            let mut failures = lock(&self.failures);
            let idx = failures.iter().position(|(m, _)| *m == method)?;
            let (_, status) = failures.remove(idx)?;
            Some(match status {
                401 => SyncError::AuthExpired,
                404 => SyncError::NotFound("injected".into()),
                429 => SyncError::RateLimited {
                    retry_after: Duration::from_secs(1),
                },
                status => SyncError::Http {
                    status,
                    body: "injected failure".into(),
                },
            })
        }

        fn filters(command: &SyncCommand) -> SyncResult<Vec<(String, String)>> {
            let query = build_lookup_filter(command.id.as_deref(), command.query.as_deref())?;
            Ok(query
                .as_deref()
                .map(query_pairs)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix("filters[")
                        .and_then(|k| k.strip_suffix(']'))
                        .map(|field| (field.to_string(), v))
                })
                .collect())
        }
    }

    fn matches_field(record: &Value, field: &str, expected: &str) -> bool {
        match record.get(field) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Number(n)) => n.to_string() == expected,
            _ => false,
        }
    }

    #[async_trait]
    impl ContentStore for MemoryContentStore {
        async fn execute(&self, command: &SyncCommand) -> SyncResult<RemoteResponse> {
            lock(&self.calls).push(command.clone());
            if let Some(err) = self.take_failure(command.method) {
                return Err(err);
            }

            let not_found = || {
                SyncError::NotFound(format!(
                    "{} {}",
                    command.entity_type,
                    command.id.as_deref().unwrap_or("")
                ))
            };

            match command.method {
                Method::Get => {
                    let filters = Self::filters(command)?;
                    let found: Vec<Value> = self
                        .records(command.entity_type)
                        .into_iter()
                        .filter(|r| filters.iter().all(|(f, v)| matches_field(r, f, v)))
                        .collect();
                    if found.is_empty() {
                        return Err(not_found());
                    }
                    Ok(RemoteResponse::from_body(200, serde_json::json!({ "data": found })))
                }
                Method::Post => {
                    let payload = command.payload.clone().unwrap_or(Value::Null);
                    if !payload.is_object() {
                        return Err(SyncError::Http {
                            status: 400,
                            body: "payload must be an object".into(),
                        });
                    }
                    let id = self.insert(command.entity_type, payload);
                    let created = self
                        .records(command.entity_type)
                        .into_iter()
                        .find(|r| matches_field(r, "id", id.as_str()))
                        .unwrap_or(Value::Null);
                    Ok(RemoteResponse::from_body(200, serde_json::json!({ "data": created })))
                }
                Method::Put => {
                    let join_id = command.id.as_deref().ok_or_else(not_found)?;
                    let mut records = lock(&self.records);
                    let record = records
                        .get_mut(&command.entity_type)
                        .and_then(|rs| rs.iter_mut().find(|r| matches_field(r, JOIN_KEY, join_id)))
                        .ok_or_else(not_found)?;
                    if let (Some(target), Some(Value::Object(changes))) =
                        (record.as_object_mut(), command.payload.as_ref())
                    {
                        for (k, v) in changes {
                            if k != "id" && k != JOIN_KEY {
                                target.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    let updated = record.clone();
                    Ok(RemoteResponse::from_body(200, serde_json::json!({ "data": updated })))
                }
                Method::Delete => {
                    let join_id = command.id.as_deref().ok_or_else(not_found)?;
                    let mut records = lock(&self.records);
                    let rs = records.get_mut(&command.entity_type).ok_or_else(not_found)?;
                    let idx = rs
                        .iter()
                        .position(|r| matches_field(r, JOIN_KEY, join_id))
                        .ok_or_else(not_found)?;
                    let removed = rs.remove(idx);
                    Ok(RemoteResponse::from_body(
                        200,
                        serde_json::json!({ "deletedData": removed }),
                    ))
                }
            }
        }
    }
}
