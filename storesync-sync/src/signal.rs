//! Signed signals exchanged between the two systems.
//!
//! A signal is a `{message, code, data, origin}` JSON document carried as an
//! HS256 JWT under a shared secret. The commerce side exposes a hook that accepts
//! `{signedMessage}` and dispatches on `message`.

use crate::commerce::CommerceCatalog;
use crate::coordinator::SyncCoordinator;
use crate::echo::EchoSuppressor;
use crate::error::{SyncError, SyncResult};
use crate::seed::{SeedPage, SeedPageBuilder};
use crate::translate::Translator;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use storesync_types::{EntityType, LOCAL_ID_FIELD, LocalId, SyncDirection};
use tracing::{debug, info, warn};

/// Path of the commerce-side signal hook.
pub const SIGNAL_HOOK_PATH: &str = "/strapi/hooks/strapi-signal";

pub const MSG_SEED: &str = "SEED";
pub const MSG_SYNC_COMPLETED: &str = "SYNC COMPLETED";
pub const MSG_UPDATE_COMMERCE: &str = "UPDATE MEDUSA";

/// Dispatch class of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Seed,
    SyncCompleted,
    UpdateCommerce,
}

/// A signal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub message: String,
    #[serde(default = "default_code")]
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Issued-at, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

fn default_code() -> u16 {
    200
}

impl SignalMessage {
    pub fn new(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            message: message.into(),
            code: 200,
            data,
            origin: Some(SyncDirection::ToContent.side().to_string()),
            iat: None,
        }
    }

    /// Request for seed page `page_number` (1-based).
    pub fn seed(page_number: u32) -> Self {
        let data = (page_number > 1).then(|| json!({ "meta": { "pageNumber": page_number } }));
        Self::new(MSG_SEED, data)
    }

    pub fn sync_completed() -> Self {
        Self::new(MSG_SYNC_COMPLETED, None)
    }

    /// A content-side edit to apply on the commerce side.
    pub fn update_commerce(entity_type: EntityType, entity: Value) -> Self {
        Self::new(
            MSG_UPDATE_COMMERCE,
            Some(json!({ "type": entity_type.as_str(), "data": entity })),
        )
    }

    pub fn kind(&self) -> Option<SignalKind> {
        match self.message.as_str() {
            MSG_SEED => Some(SignalKind::Seed),
            MSG_SYNC_COMPLETED => Some(SignalKind::SyncCompleted),
            MSG_UPDATE_COMMERCE => Some(SignalKind::UpdateCommerce),
            _ => None,
        }
    }

    /// Requested page of a seed signal, 1 when absent.
    pub fn page_number(&self) -> u32 {
        self.data
            .as_ref()
            .and_then(|d| d.pointer("/meta/pageNumber"))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(1)
    }
}

/// Signs and verifies signal envelopes.
#[derive(Clone)]
pub struct SignalCodec {
    secret: Vec<u8>,
}

impl SignalCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // Signals carry no expiry or audience.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation
    }

    /// Produces an HS256 compact token. Stamps `iat` if unset.
    pub fn sign(&self, message: &SignalMessage) -> SyncResult<String> {
        let mut message = message.clone();
        message.iat.get_or_insert_with(|| chrono::Utc::now().timestamp());

        encode(
            &Header::new(Algorithm::HS256),
            &message,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| SyncError::Signature(format!("signing failed: {e}")))
    }

    /// Checks the signature and decodes the message.
    pub fn verify(&self, token: &str) -> SyncResult<SignalMessage> {
        decode::<SignalMessage>(
            token.trim(),
            &DecodingKey::from_secret(&self.secret),
            &Self::validation(),
        )
        .map(|data| data.claims)
        .map_err(map_jwt_error)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> SyncError {
    let reason = match err.kind() {
        ErrorKind::InvalidSignature => "signature mismatch".to_string(),
        ErrorKind::InvalidAlgorithm => "unsupported algorithm".to_string(),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => "malformed token".to_string(),
        ErrorKind::Json(e) => format!("malformed token: {e}"),
        ErrorKind::Utf8(_) => "malformed token: invalid utf-8".to_string(),
        _ => format!("token rejected: {err}"),
    };
    SyncError::Signature(reason)
}

/// What the commerce hook answers.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalReply {
    SeedPage(SeedPage),
    Acknowledged,
    Updated(Value),
}

impl SignalReply {
    /// Response body sent back to the content side.
    pub fn into_body(self) -> SyncResult<Value> {
        Ok(match self {
            Self::SeedPage(page) => serde_json::to_value(page)?,
            Self::Acknowledged => json!({ "status": "ok" }),
            Self::Updated(entity) => json!({ "status": "ok", "data": entity }),
        })
    }
}

/// Commerce-side dispatcher for verified signals.
pub struct SignalHandler {
    codec: SignalCodec,
    pages: SeedPageBuilder,
    catalog: Arc<dyn CommerceCatalog>,
    translator: Translator,
    echo: EchoSuppressor,
    coordinator: Arc<SyncCoordinator>,
}

impl SignalHandler {
    pub fn new(
        codec: SignalCodec,
        catalog: Arc<dyn CommerceCatalog>,
        page_limit: usize,
        translator: Translator,
        echo: EchoSuppressor,
        coordinator: Arc<SyncCoordinator>,
    ) -> Self {
        Self {
            codec,
            pages: SeedPageBuilder::new(catalog.clone(), page_limit),
            catalog,
            translator,
            echo,
            coordinator,
        }
    }

    /// Handles a `{signedMessage}` request body.
    pub async fn handle_body(&self, body: &Value) -> SyncResult<SignalReply> {
        let token = body
            .get("signedMessage")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Signature("missing signedMessage".into()))?;
        let message = self.codec.verify(token)?;
        self.handle(message).await
    }

    pub async fn handle(&self, message: SignalMessage) -> SyncResult<SignalReply> {
        debug!(message = %message.message, origin = message.origin.as_deref().unwrap_or(""), "signal received");
        match message.kind() {
            Some(SignalKind::Seed) => {
                let page = self.pages.build(message.page_number()).await?;
                Ok(SignalReply::SeedPage(page))
            }
            Some(SignalKind::SyncCompleted) => {
                self.coordinator.mark_seed_completed();
                info!(runs = self.coordinator.completed_runs(), "content side reports seed completed");
                Ok(SignalReply::Acknowledged)
            }
            Some(SignalKind::UpdateCommerce) => self.apply_update(message.data.unwrap_or(Value::Null)).await,
            None => {
                warn!(message = %message.message, "unknown signal");
                Err(SyncError::ValidationConflict(format!(
                    "unknown signal '{}'",
                    message.message
                )))
            }
        }
    }

    async fn apply_update(&self, data: Value) -> SyncResult<SignalReply> {
        let entity_type: EntityType = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::ValidationConflict("update without type".into()))?
            .parse()?;
        let entity = data.get("data").cloned().unwrap_or(Value::Null);
        let local = self.translator.inbound(Some(entity_type), &entity);
        let id = local
            .get(LOCAL_ID_FIELD)
            .and_then(LocalId::from_json)
            .ok_or_else(|| SyncError::ValidationConflict(format!("{entity_type} update without id")))?;

        // The catalog write comes back as a commerce event; skip that echo.
        self.echo
            .mark_ignored(id.as_str(), SyncDirection::ToContent, None)
            .await;
        let updated = self.catalog.apply_update(entity_type, id.as_str(), &local).await?;
        info!(%entity_type, id = %id, "commerce entity updated from content");
        Ok(SignalReply::Updated(updated))
    }
}
