//! Shared HTTP plumbing: client construction and status mapping.

use crate::error::{SyncError, SyncResult};
use crate::retry::RateLimitHints;
use crate::config::RetryConfig;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Builds the client used for every call to a remote system.
pub fn build_client(timeout: Duration) -> SyncResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))
}

/// Passes successful responses through; maps everything else onto the error
/// taxonomy. 429s carry the computed delay for the given attempt.
pub async fn check_response(
    resp: Response,
    retry: &RetryConfig,
    attempt: u32,
) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(SyncError::AuthExpired),
        StatusCode::TOO_MANY_REQUESTS => {
            let hints = RateLimitHints::from_headers(resp.headers());
            let retry_after = crate::retry::delay_for(retry, attempt, &hints, chrono::Utc::now());
            debug!(?hints, "429 received");
            Err(SyncError::RateLimited { retry_after })
        }
        StatusCode::NOT_FOUND => {
            let url = resp.url().path().to_string();
            Err(SyncError::NotFound(url))
        }
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(SyncError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}
