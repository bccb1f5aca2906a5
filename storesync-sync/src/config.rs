//! Engine configuration.
//!
//! Read once at startup from a TOML file; the relay binary layers CLI flags
//! and environment variables on top. Durations are stored as whole seconds
//! so the file format stays flat.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use storesync_types::{EntityType, Identity};

/// Default number of entities per collection in one seed page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Port the content system listens on when not served over https.
pub const DEFAULT_CONTENT_PORT: u16 = 1337;

/// Where the content system lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `http` or `https`.
    pub protocol: String,
    pub host: String,
    /// Ignored for https.
    pub port: u16,
    /// Plugin namespace under `/api` and for the bootstrap routes.
    pub namespace: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: DEFAULT_CONTENT_PORT,
            namespace: "strapi-plugin-medusajs".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Builds a config pointing at an arbitrary base URL (used by tests and
    /// the `--content-url` flag).
    pub fn from_url(url: &str) -> SyncResult<Self> {
        let (protocol, rest) = url
            .split_once("://")
            .ok_or_else(|| SyncError::Config(format!("missing scheme in {url}")))?;
        let rest = rest.trim_end_matches('/');
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| SyncError::Config(format!("invalid port in {url}: {e}")))?;
                (host.to_string(), port)
            }
            None if protocol == "https" => (rest.to_string(), 443),
            None => (rest.to_string(), 80),
        };
        Ok(Self {
            protocol: protocol.to_string(),
            host,
            port,
            ..Self::default()
        })
    }

    /// Base URL without a trailing slash. https deployments sit behind a
    /// proxy on the default port, so the port is omitted.
    pub fn base_url(&self) -> String {
        if self.protocol == "https" {
            format!("https://{}", self.host)
        } else {
            format!("{}://{}:{}", self.protocol, self.host, self.port)
        }
    }

    /// `{base}/api/{namespace}`.
    pub fn api_url(&self) -> String {
        format!("{}/api/{}", self.base_url(), self.namespace)
    }
}

/// Health gate timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How long a health verdict stays valid.
    pub check_interval_secs: u64,
    /// Poll interval while waiting for the remote to come up.
    pub poll_interval_ms: u64,
    /// Probe attempts per health check before declaring the remote unhealthy.
    pub probe_attempts: u32,
    /// Delay between probe attempts.
    pub probe_retry_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 120,
            poll_interval_ms: 1_000,
            probe_attempts: 3,
            probe_retry_ms: 3_000,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_retry(&self) -> Duration {
        Duration::from_millis(self.probe_retry_ms)
    }
}

/// Rate-limit backoff knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Delay used when a 429 carries no hints at all.
    pub fallback_delay_secs: u64,
    /// Added to a reset-time hint to absorb clock skew.
    pub reset_padding_secs: u64,
    /// Overall wall-clock budget for one call including all retries.
    pub deadline_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 100,
            fallback_delay_secs: 400,
            reset_padding_secs: 2,
            deadline_secs: None,
        }
    }
}

impl RetryConfig {
    /// Environment variable overriding `max_retries`.
    pub const ENV_MAX: &'static str = "STORESYNC_RETRY_MAX";
    /// Environment variable overriding `fallback_delay_secs`.
    pub const ENV_FALLBACK: &'static str = "STORESYNC_RETRY_FALLBACK_SECS";

    /// Defaults overlaid with environment knobs. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|k| std::env::var(k).ok())
    }

    /// Applies overrides from an arbitrary lookup (environment in production).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup(Self::ENV_MAX).and_then(|v| v.parse().ok()) {
            self.max_retries = v;
        }
        if let Some(v) = lookup(Self::ENV_FALLBACK).and_then(|v| v.parse().ok()) {
            self.fallback_delay_secs = v;
        }
        self
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_secs(self.fallback_delay_secs)
    }

    pub fn reset_padding(&self) -> Duration {
        Duration::from_secs(self.reset_padding_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Top-level configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    /// Content-system administrator, used only during startup.
    pub admin: Identity,
    /// Default service identity for unattended sync.
    pub service: Identity,
    /// Base URL of the commerce system (for the seed handshake).
    pub commerce_url: String,
    /// Shared secret for signed signals.
    pub signal_secret: String,
    pub page_size: usize,
    pub health: HealthConfig,
    pub retry: RetryConfig,
    /// Cached sessions older than this are refreshed before use.
    pub credential_staleness_secs: u64,
    /// Lifetime of echo markers.
    pub echo_ttl_secs: u64,
    /// Per-request timeout. Bulk operations are slow, so this is generous.
    pub request_timeout_secs: u64,
    /// Ask the content system to run a full seed once startup completes.
    pub sync_on_startup: bool,
    /// Per-type field renames applied on the way out (local → content).
    pub field_remaps: HashMap<EntityType, HashMap<String, String>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            admin: Identity::administrator("admin@medusa-test.com", ""),
            service: Identity::service("service@medusa-test.com", ""),
            commerce_url: "http://localhost:9000".to_string(),
            signal_secret: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            health: HealthConfig::default(),
            retry: RetryConfig::default(),
            credential_staleness_secs: 180,
            echo_ttl_secs: 30,
            request_timeout_secs: 3_600,
            sync_on_startup: false,
            field_remaps: HashMap::new(),
        }
    }
}

impl SyncConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> SyncResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| SyncError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("page_size must be at least 1".into()));
        }
        if self.remote.host.is_empty() {
            return Err(SyncError::Config("remote.host is empty".into()));
        }
        Ok(())
    }

    pub fn credential_staleness(&self) -> Duration {
        Duration::from_secs(self.credential_staleness_secs)
    }

    pub fn echo_ttl(&self) -> Duration {
        Duration::from_secs(self.echo_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
