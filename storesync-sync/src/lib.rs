//! Bidirectional sync engine between a commerce backend and a content store.
//!
//! The commerce system is the source of truth; the content system mirrors its
//! catalogue and can push edits back. Records are matched across the two by
//! a join key (`medusa_id`) that holds the commerce identifier.
//!
//! # Components
//!
//! - **Credentials**: per-identity session cache with a single re-login on 401
//! - **Health**: probes the content system and gates every outbound call
//! - **Retry**: rate-limit aware backoff driven by response headers
//! - **Translate**: schema-driven rewriting of identifiers and relation keys
//! - **Echo**: short-lived markers that stop sync writes from looping back
//! - **Reconcile**: create/read/update/delete plus nested find-or-create
//! - **Seed**: paged bulk transfer, both the driving and the serving side
//! - **Bridge**: commerce events to reconciliation calls
//! - **Signal**: signed messages exchanged between the two systems
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use storesync_sync::content::memory::MemoryContentStore;
//! use storesync_sync::{EchoSuppressor, MemoryEchoCache, Reconciler, SchemaRegistry, Translator};
//!
//! let schemas = Arc::new(SchemaRegistry::standard().unwrap());
//! let reconciler = Reconciler::new(
//!     Arc::new(MemoryContentStore::new()),
//!     Translator::new(schemas),
//!     EchoSuppressor::new(Arc::new(MemoryEchoCache::new()), Duration::from_secs(30)),
//! );
//! # let _ = reconciler;
//! ```

pub mod bootstrap;
pub mod bridge;
pub mod commerce;
pub mod config;
pub mod content;
pub mod coordinator;
pub mod credentials;
pub mod echo;
mod error;
pub mod health;
pub mod http;
pub mod reconcile;
pub mod retry;
pub mod schema;
pub mod seed;
pub mod shape;
pub mod signal;
pub mod translate;

pub use bootstrap::{StartupReport, StartupSequence};
pub use bridge::{EventAction, EventBridge, EventName, SUBSCRIBED_EVENTS};
pub use commerce::CommerceCatalog;
pub use config::{HealthConfig, RemoteConfig, RetryConfig, SyncConfig};
pub use content::{ContentStore, Method, RemoteResponse, RestContentStore, SyncCommand};
pub use coordinator::{CoordinatorSnapshot, SeedGuard, SyncCoordinator};
pub use credentials::{CredentialStore, HttpLogin, LoginExchange, Session};
pub use echo::{EchoCache, EchoSuppressor, MemoryEchoCache};
pub use error::{SyncError, SyncResult};
pub use health::{HealthGate, HealthProbe, HealthState, HttpHealthProbe};
pub use reconcile::{DeferredRelation, NestedChild, NestedResolution, Reconciler, SyncOutcome, SyncStatus};
pub use retry::{RateLimitHints, RetryLayer};
pub use schema::{EntitySchema, RelationDecl, RelationKind, SchemaRegistry};
pub use seed::{SeedDriver, SeedPage, SeedPageBuilder, SeedRun, SeedSource, SeedSummary, SignalSeedSource};
pub use signal::{SignalCodec, SignalHandler, SignalKind, SignalMessage, SignalReply};
pub use translate::{FieldKind, Translator};
