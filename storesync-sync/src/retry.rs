//! Rate-limit aware retry for outbound calls.
//!
//! Only `429` responses are retried here. Authorization failures go through
//! the credential store's single re-login path and every other error is
//! returned to the caller unchanged.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Header carrying a per-attempt delay in seconds.
pub const RETRY_AFTER_HEADER: &str = "x-retry-after";
/// Header carrying the unix time (seconds) at which the window resets.
pub const RATELIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Largest per-attempt hint honoured; larger values count as absent.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Upper bound on any single backoff.
pub const MAX_DELAY: Duration = Duration::from_secs(3_600);

/// Backoff hints a 429 response may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHints {
    pub retry_after: Option<Duration>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitHints {
    /// Reads both hints. Missing, non-numeric and zero values count as
    /// absent, and so does a per-attempt delay above [`MAX_RETRY_AFTER`].
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|v| *v > 0)
        };
        Self {
            retry_after: number(RETRY_AFTER_HEADER)
                .map(|s| Duration::from_secs(s.unsigned_abs()))
                .filter(|d| *d <= MAX_RETRY_AFTER),
            reset_at: number(RATELIMIT_RESET_HEADER)
                .and_then(|s| Utc.timestamp_opt(s, 0).single()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.retry_after.is_none() && self.reset_at.is_none()
    }
}

/// Computes how long to wait before retry number `attempt` (1-based).
/// Never exceeds [`MAX_DELAY`].
pub fn delay_for(
    config: &RetryConfig,
    attempt: u32,
    hints: &RateLimitHints,
    now: DateTime<Utc>,
) -> Duration {
    let delay = match (hints.retry_after, hints.reset_at) {
        (None, None) => config.fallback_delay(),
        (None, Some(reset)) => {
            let remaining = (reset - now).to_std().unwrap_or(Duration::ZERO);
            remaining.saturating_add(config.reset_padding())
        }
        (Some(after), _) => after.checked_mul(attempt.max(1)).unwrap_or(Duration::MAX),
    };
    delay.min(MAX_DELAY)
}

/// Retries operations that fail with [`SyncError::RateLimited`].
#[derive(Debug, Clone, Default)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op` until it succeeds, fails with anything other than a rate
    /// limit, or the retry budget is spent. `op` receives the 1-based attempt
    /// number, which feeds the backoff computation of a 429 on that attempt.
    /// The optional deadline covers the whole sequence and is not restarted
    /// per attempt.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let deadline = self.config.deadline().and_then(|d| Instant::now().checked_add(d));
        let mut attempt = 0u32;

        loop {
            let result = match deadline {
                Some(at) => tokio::time::timeout_at(at, op(attempt + 1))
                    .await
                    .map_err(|_| SyncError::Timeout)?,
                None => op(attempt + 1).await,
            };

            let retry_after = match result {
                Err(SyncError::RateLimited { retry_after }) => retry_after.min(MAX_DELAY),
                other => return other,
            };

            attempt += 1;
            if attempt > self.config.max_retries {
                warn!(op = op_name, attempts = attempt, "rate limit retries exhausted");
                return Err(SyncError::RateLimited { retry_after });
            }

            if let Some(at) = deadline {
                let wake = Instant::now().checked_add(retry_after);
                if wake.is_none_or(|wake| wake >= at) {
                    warn!(op = op_name, "rate limit backoff would exceed deadline");
                    return Err(SyncError::Timeout);
                }
            }

            debug!(
                op = op_name,
                attempt,
                delay_ms = retry_after.as_millis() as u64,
                "rate limited, backing off"
            );
            tokio::time::sleep(retry_after).await;
        }
    }
}
