//! Tests for retry.rs and http.rs: backoff computation, the retry loop and
//! status mapping.

use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use storesync_sync::config::RetryConfig;
use storesync_sync::http::check_response;
use storesync_sync::retry::{
    MAX_DELAY, MAX_RETRY_AFTER, RATELIMIT_RESET_HEADER, RETRY_AFTER_HEADER, RateLimitHints,
    RetryLayer, delay_for,
};
use storesync_sync::SyncError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        ..RetryConfig::default()
    }
}

// ── Hints ───────────────────────────────────────────────────────

#[test]
fn hints_read_both_headers() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_static("3"));
    headers.insert(RATELIMIT_RESET_HEADER, HeaderValue::from_static("1700000000"));

    let hints = RateLimitHints::from_headers(&headers);
    assert_eq!(hints.retry_after, Some(Duration::from_secs(3)));
    assert_eq!(hints.reset_at, Utc.timestamp_opt(1_700_000_000, 0).single());
}

#[test]
fn hints_ignore_garbage_and_zero() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_static("soon"));
    headers.insert(RATELIMIT_RESET_HEADER, HeaderValue::from_static("0"));

    assert!(RateLimitHints::from_headers(&headers).is_empty());
    assert!(RateLimitHints::from_headers(&HeaderMap::new()).is_empty());
}

#[test]
fn hints_above_sixty_seconds_count_as_absent() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_static("60"));
    assert_eq!(
        RateLimitHints::from_headers(&headers).retry_after,
        Some(MAX_RETRY_AFTER)
    );

    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_static("61"));
    assert!(RateLimitHints::from_headers(&headers).is_empty());

    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from_static("9223372036854775807"));
    assert!(RateLimitHints::from_headers(&headers).is_empty());
}

// ── Delay computation ───────────────────────────────────────────

#[test]
fn no_hints_uses_fallback_delay() {
    let delay = delay_for(&RetryConfig::default(), 1, &RateLimitHints::default(), Utc::now());
    assert_eq!(delay, Duration::from_secs(400));
}

#[test]
fn reset_header_waits_until_reset_plus_padding() {
    let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    let hints = RateLimitHints {
        retry_after: None,
        reset_at: Utc.timestamp_opt(1_700_000_005, 0).single(),
    };

    let delay = delay_for(&RetryConfig::default(), 1, &hints, now);
    assert_eq!(delay, Duration::from_secs(7));
}

#[test]
fn reset_in_the_past_waits_only_padding() {
    let now = Utc.timestamp_opt(1_700_000_100, 0).single().unwrap();
    let hints = RateLimitHints {
        retry_after: None,
        reset_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
    };

    assert_eq!(
        delay_for(&RetryConfig::default(), 1, &hints, now),
        Duration::from_secs(2)
    );
}

#[test]
fn retry_after_scales_with_attempt() {
    let hints = RateLimitHints {
        retry_after: Some(Duration::from_secs(3)),
        reset_at: None,
    };
    let config = RetryConfig::default();

    assert_eq!(delay_for(&config, 1, &hints, Utc::now()), Duration::from_secs(3));
    assert_eq!(delay_for(&config, 4, &hints, Utc::now()), Duration::from_secs(12));
}

#[test]
fn oversized_retry_after_saturates_instead_of_overflowing() {
    let hints = RateLimitHints {
        retry_after: Some(Duration::from_secs(u64::MAX)),
        reset_at: None,
    };
    let config = RetryConfig::default();

    assert_eq!(delay_for(&config, 3, &hints, Utc::now()), MAX_DELAY);
    assert_eq!(delay_for(&config, u32::MAX, &hints, Utc::now()), MAX_DELAY);
}

#[test]
fn far_future_reset_is_clamped() {
    let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    let hints = RateLimitHints {
        retry_after: None,
        reset_at: Utc.timestamp_opt(i32::MAX as i64 * 100, 0).single(),
    };

    assert_eq!(delay_for(&RetryConfig::default(), 1, &hints, now), MAX_DELAY);
}

// ── Retry loop ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retries_rate_limited_until_success() {
    let layer = RetryLayer::new(config(5));
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let result = layer
        .execute("op", move |attempt| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(SyncError::RateLimited {
                        retry_after: Duration::from_secs(10),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_retries() {
    let layer = RetryLayer::new(config(2));
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let result: Result<(), _> = layer
        .execute("op", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::RateLimited {
                    retry_after: Duration::from_secs(1),
                })
            }
        })
        .await;

    assert!(matches!(result, Err(SyncError::RateLimited { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn other_errors_are_not_retried() {
    let layer = RetryLayer::new(config(5));
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();

    let result: Result<(), _> = layer
        .execute("op", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::ValidationConflict("bad".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(SyncError::ValidationConflict(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_past_deadline_times_out() {
    let layer = RetryLayer::new(RetryConfig {
        max_retries: 10,
        deadline_secs: Some(30),
        ..RetryConfig::default()
    });

    let result: Result<(), _> = layer
        .execute("op", |_| async {
            Err(SyncError::RateLimited {
                retry_after: Duration::from_secs(60),
            })
        })
        .await;

    assert!(matches!(result, Err(SyncError::Timeout)));
}

#[tokio::test(start_paused = true)]
async fn unbounded_backoff_with_deadline_times_out() {
    let layer = RetryLayer::new(RetryConfig {
        max_retries: 3,
        deadline_secs: Some(30),
        ..RetryConfig::default()
    });

    let result: Result<(), _> = layer
        .execute("op", |_| async {
            Err(SyncError::RateLimited {
                retry_after: Duration::MAX,
            })
        })
        .await;

    assert!(matches!(result, Err(SyncError::Timeout)));
}

#[tokio::test(start_paused = true)]
async fn huge_deadline_does_not_overflow() {
    let layer = RetryLayer::new(RetryConfig {
        deadline_secs: Some(u64::MAX),
        ..RetryConfig::default()
    });

    let result = layer.execute("op", |attempt| async move { Ok(attempt) }).await;
    assert_eq!(result.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_attempt_hits_deadline() {
    let layer = RetryLayer::new(RetryConfig {
        deadline_secs: Some(5),
        ..RetryConfig::default()
    });

    let result: Result<(), _> = layer
        .execute("op", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(SyncError::Timeout)));
}

// ── Status mapping ──────────────────────────────────────────────

async fn respond(server: &MockServer, template: ResponseTemplate) -> reqwest::Response {
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(template)
        .mount(server)
        .await;
    reqwest::get(format!("{}/resource", server.uri())).await.unwrap()
}

#[tokio::test]
async fn maps_unauthorized_to_auth_expired() {
    let server = MockServer::start().await;
    let resp = respond(&server, ResponseTemplate::new(401)).await;
    let err = check_response(resp, &RetryConfig::default(), 1).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired));
}

#[tokio::test]
async fn maps_too_many_requests_with_attempt_delay() {
    let server = MockServer::start().await;
    let resp = respond(
        &server,
        ResponseTemplate::new(429).insert_header(RETRY_AFTER_HEADER, "3"),
    )
    .await;
    let err = check_response(resp, &RetryConfig::default(), 2).await.unwrap_err();
    match err {
        SyncError::RateLimited { retry_after } => assert_eq!(retry_after, Duration::from_secs(6)),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn maps_oversized_retry_after_to_fallback_delay() {
    let server = MockServer::start().await;
    let resp = respond(
        &server,
        ResponseTemplate::new(429).insert_header(RETRY_AFTER_HEADER, "9223372036854775807"),
    )
    .await;
    let err = check_response(resp, &RetryConfig::default(), 3).await.unwrap_err();
    match err {
        SyncError::RateLimited { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(400))
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn maps_not_found_and_other_statuses() {
    let server = MockServer::start().await;
    let resp = respond(&server, ResponseTemplate::new(404)).await;
    let err = check_response(resp, &RetryConfig::default(), 1).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status(), 404);

    let server = MockServer::start().await;
    let resp = respond(&server, ResponseTemplate::new(502).set_body_string("bad gateway")).await;
    match check_response(resp, &RetryConfig::default(), 1).await.unwrap_err() {
        SyncError::Http { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn passes_success_through() {
    let server = MockServer::start().await;
    let resp = respond(&server, ResponseTemplate::new(204)).await;
    let resp = check_response(resp, &RetryConfig::default(), 1).await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);
}
