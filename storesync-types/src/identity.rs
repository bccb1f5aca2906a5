//! Authentication identities and sync directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which login exchange an identity goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// A content-system API user (the default service account, or an operator).
    #[default]
    Service,
    /// The content-system administrator.
    Administrator,
}

/// Credentials used to obtain a session token from the content system.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Login identifier (an email address).
    pub key: String,
    /// Password.
    pub secret: String,
    #[serde(default)]
    pub kind: IdentityKind,
}

impl Identity {
    /// Creates a service identity.
    pub fn service(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            kind: IdentityKind::Service,
        }
    }

    /// Creates an administrator identity.
    pub fn administrator(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            kind: IdentityKind::Administrator,
        }
    }

    /// Cache key for this identity. Login identifiers are case-insensitive.
    pub fn cache_key(&self) -> String {
        self.key.to_lowercase()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("key", &self.key)
            .field("secret", &"######")
            .field("kind", &self.kind)
            .finish()
    }
}

/// Direction of a sync write. Part of every echo marker key so the two
/// directions never suppress each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Commerce → content.
    ToContent,
    /// Content → commerce.
    ToCommerce,
}

impl SyncDirection {
    /// Side label used in marker keys (the side that would receive the echo).
    pub const fn side(&self) -> &'static str {
        match self {
            Self::ToContent => "strapi",
            Self::ToCommerce => "medusa",
        }
    }

    /// The opposite direction.
    pub const fn reverse(&self) -> Self {
        match self {
            Self::ToContent => Self::ToCommerce,
            Self::ToCommerce => Self::ToContent,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.side())
    }
}
