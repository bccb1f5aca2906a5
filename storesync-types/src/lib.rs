//! Core type definitions for storesync.
//!
//! This crate defines the plain, I/O-free types shared by the sync engine and
//! the relay agent:
//! - Identifiers on each side of the sync (`LocalId`, `ForeignId`) and seed run ids
//! - The catalogue of entity types and their naming conventions
//! - Authentication identities and sync directions
//!
//! Entity payloads themselves are schemaless JSON; their relation structure is
//! declared by the engine's schema registry, not here.

mod entity_type;
mod identity;
mod ids;

pub use entity_type::EntityType;
pub use identity::{Identity, IdentityKind, SyncDirection};
pub use ids::{ForeignId, LocalId, RunId};

/// Field under which the content system stores the commerce identifier.
pub const JOIN_KEY: &str = "medusa_id";

/// Field carrying an entity's identifier in the commerce system.
pub const LOCAL_ID_FIELD: &str = "id";

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}
