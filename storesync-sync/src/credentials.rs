//! Session token cache for content-system identities.
//!
//! Tokens are fetched lazily through a [`LoginExchange`] and reused until
//! they are older than the staleness window. A 401 anywhere downstream
//! invalidates the identity's entry; the caller retries once with a fresh
//! token.

use crate::config::{RemoteConfig, RetryConfig};
use crate::error::{SyncError, SyncResult};
use crate::http::{build_client, check_response};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storesync_types::{Identity, IdentityKind};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A cached login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub issued_at: Instant,
    /// The user record returned by the login call.
    pub profile: Value,
}

impl Session {
    pub fn new(token: impl Into<String>, profile: Value) -> Self {
        Self {
            token: token.into(),
            issued_at: Instant::now(),
            profile,
        }
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.issued_at)
    }
}

/// Exchanges an identity for a session.
#[async_trait]
pub trait LoginExchange: Send + Sync {
    async fn login(&self, identity: &Identity) -> SyncResult<Session>;
}

// ── HTTP login ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ServiceLoginResponse {
    jwt: String,
    #[serde(default)]
    user: Value,
}

#[derive(Debug, Deserialize)]
struct AdminLoginResponse {
    data: AdminLoginData,
}

#[derive(Debug, Deserialize)]
struct AdminLoginData {
    token: String,
    #[serde(default)]
    user: Value,
}

/// Logs in against the content system's REST API.
///
/// Service identities use `POST /api/auth/local`; the administrator uses
/// `POST /admin/login`.
pub struct HttpLogin {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpLogin {
    pub fn new(remote: &RemoteConfig, timeout: Duration) -> SyncResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: remote.base_url(),
            retry: RetryConfig::default(),
        })
    }
}

#[async_trait]
impl LoginExchange for HttpLogin {
    async fn login(&self, identity: &Identity) -> SyncResult<Session> {
        let (url, body) = match identity.kind {
            IdentityKind::Service => (
                format!("{}/api/auth/local", self.base_url),
                json!({ "identifier": identity.key, "password": identity.secret }),
            ),
            IdentityKind::Administrator => (
                format!("{}/admin/login", self.base_url),
                json!({ "email": identity.key, "password": identity.secret }),
            ),
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("login request failed: {e}")))?;

        let resp = match check_response(resp, &self.retry, 1).await {
            Ok(resp) => resp,
            Err(SyncError::AuthExpired) | Err(SyncError::Http { status: 400, .. }) => {
                return Err(SyncError::Auth(format!("login rejected for {}", identity.key)));
            }
            Err(e) => return Err(e),
        };

        let session = match identity.kind {
            IdentityKind::Service => {
                let parsed: ServiceLoginResponse = resp
                    .json()
                    .await
                    .map_err(|e| SyncError::Auth(format!("invalid login response: {e}")))?;
                Session::new(parsed.jwt, parsed.user)
            }
            IdentityKind::Administrator => {
                let parsed: AdminLoginResponse = resp
                    .json()
                    .await
                    .map_err(|e| SyncError::Auth(format!("invalid login response: {e}")))?;
                Session::new(parsed.data.token, parsed.data.user)
            }
        };
        Ok(session)
    }
}

// ── Store ───────────────────────────────────────────────────────

/// Per-identity session cache.
///
/// Concurrent callers that miss the cache for the same identity share one
/// login.
pub struct CredentialStore {
    exchange: Arc<dyn LoginExchange>,
    sessions: RwLock<HashMap<String, Session>>,
    /// One gate per identity, held across its login call.
    logins: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    staleness: Duration,
}

impl CredentialStore {
    pub fn new(exchange: Arc<dyn LoginExchange>, staleness: Duration) -> Self {
        Self {
            exchange,
            sessions: RwLock::new(HashMap::new()),
            logins: Mutex::new(HashMap::new()),
            staleness,
        }
    }

    async fn fresh(&self, key: &str) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(key)
            .filter(|session| session.age() < self.staleness)
            .cloned()
    }

    async fn login_gate(&self, key: &str) -> Arc<Mutex<()>> {
        self.logins
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Returns a usable token, logging in if there is no fresh cached one.
    pub async fn token(&self, identity: &Identity) -> SyncResult<String> {
        Ok(self.session(identity).await?.token)
    }

    /// Returns the full session, logging in if needed.
    pub async fn session(&self, identity: &Identity) -> SyncResult<Session> {
        let key = identity.cache_key();
        if let Some(session) = self.fresh(&key).await {
            return Ok(session);
        }

        let gate = self.login_gate(&key).await;
        let _login = gate.lock().await;
        // Another caller may have logged in while this one waited.
        if let Some(session) = self.fresh(&key).await {
            return Ok(session);
        }
        if self.is_cached(identity).await {
            debug!(identity = %identity.key, "cached session is stale");
        }

        match self.exchange.login(identity).await {
            Ok(session) => {
                info!(identity = %identity.key, "logged in");
                self.sessions.write().await.insert(key, session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!(identity = %identity.key, error = %e, "login failed");
                Err(e)
            }
        }
    }

    /// Drops the identity's entry and logs in again.
    pub async fn refresh(&self, identity: &Identity) -> SyncResult<String> {
        self.invalidate(identity).await;
        self.token(identity).await
    }

    /// Drops one identity's cached session.
    pub async fn invalidate(&self, identity: &Identity) {
        if self.sessions.write().await.remove(&identity.cache_key()).is_some() {
            debug!(identity = %identity.key, "session invalidated");
        }
    }

    /// Drops every cached session. Called when the remote goes unhealthy.
    pub async fn clear(&self) {
        let mut sessions = self.sessions.write().await;
        if !sessions.is_empty() {
            info!(count = sessions.len(), "clearing cached sessions");
            sessions.clear();
        }
    }

    pub async fn is_cached(&self, identity: &Identity) -> bool {
        self.sessions.read().await.contains_key(&identity.cache_key())
    }
}
