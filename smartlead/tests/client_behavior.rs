//! Behavioral tests for `SmartleadClient` against a mock HTTP server.
//!
//! Covers the resilience contract: bounded retry on 5xx/429, immediate
//! failure otherwise, Retry-After clamping, dry-run short-circuits, auth
//! headers, and the occurred_at fill policy.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Utc};
use outreach_smartlead::{
    ListOptions, PullOptions, PullQuery, SmartleadClient, SmartleadConfig, SmartleadError,
};
use outreach_testing::mocks::FixedClock;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SmartleadClient {
    SmartleadClient::new(SmartleadConfig::new(server.uri(), "test-key"))
}

fn tight_cap() -> Option<Duration> {
    // Keep retry sleeps short in tests; the clamp logic itself is covered
    // by unit tests on the pure wait computation.
    Some(Duration::from_millis(20))
}

#[tokio::test]
async fn pull_events_normalizes_the_batch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [
                {
                    "id": "evt-1",
                    "event_type": "reply",
                    "outcome": "meeting",
                    "lead_id": "lead-1",
                    "occurred_at": "2025-06-01T10:00:00Z",
                },
                {
                    "id": "evt-2",
                    "event_type": "open",
                    "occurred_at": "2025-06-01T11:00:00Z",
                },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .pull_events(PullQuery::default(), PullOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.filled_occurred_at, 0);
    assert_eq!(outcome.events[0].provider, "smartlead");
    assert_eq!(outcome.events[0].provider_event_id.as_deref(), Some("evt-1"));
    assert_eq!(
        outcome.events[0].reply_label,
        Some(outreach_core::event::ReplyLabel::Replied)
    );
}

#[tokio::test]
async fn pull_events_passes_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("limit", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .pull_events(
            PullQuery {
                since: None,
                limit: Some(50),
            },
            PullOptions::default(),
        )
        .await
        .unwrap();
    assert!(outcome.events.is_empty());
}

#[tokio::test]
async fn transient_failure_is_retried_once_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server)
        .pull_events(
            PullQuery::default(),
            PullOptions {
                retry_after_cap: tight_cap(),
                ..PullOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.events.is_empty());
}

#[tokio::test]
async fn persistent_5xx_fails_with_the_second_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(502).set_body_string("first"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string(r#"{"error": "still down"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .pull_events(
            PullQuery::default(),
            PullOptions {
                retry_after_cap: tight_cap(),
                ..PullOptions::default()
            },
        )
        .await
        .unwrap_err();

    // The surfaced error is the retry's failure, not the first attempt's.
    match err {
        SmartleadError::Api {
            status, snippet, url, ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(snippet, "still down");
            assert!(url.contains("/events"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .pull_events(
            PullQuery::default(),
            PullOptions {
                retry_after_cap: tight_cap(),
                ..PullOptions::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn client_error_fails_immediately_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"message": "bad since"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .pull_events(PullQuery::default(), PullOptions::default())
        .await
        .unwrap_err();
    match err {
        SmartleadError::Api { status, snippet, .. } => {
            assert_eq!(status, 400);
            assert_eq!(snippet, "bad since");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn retry_after_header_is_clamped_by_the_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(502)
                .insert_header("Retry-After", "10")
                .set_body_string("down"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"events": []})))
        .expect(1)
        .mount(&server)
        .await;

    let started = Instant::now();
    client_for(&server)
        .pull_events(
            PullQuery::default(),
            PullOptions {
                retry_after_cap: Some(Duration::from_millis(200)),
                ..PullOptions::default()
            },
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // The 10-second header was clamped to the 200ms cap.
    assert!(elapsed >= Duration::from_millis(200), "slept {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "slept {elapsed:?}");
}

#[tokio::test]
async fn dry_run_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client
        .pull_events(
            PullQuery::default(),
            PullOptions {
                dry_run: true,
                ..PullOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(outcome.events.is_empty());

    let campaigns = client
        .list_campaigns(ListOptions {
            dry_run: true,
            ..ListOptions::default()
        })
        .await
        .unwrap();
    assert!(campaigns.is_empty());
}

#[tokio::test]
async fn auth_and_workspace_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/campaigns"))
        .and(header("Authorization", "Bearer test-key"))
        .and(header("X-Workspace-Id", "ws-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "campaigns": [{"id": "c-1", "name": "Q3 DACH"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SmartleadClient::new(
        SmartleadConfig::new(server.uri(), "test-key").with_workspace_id("ws-1"),
    );
    let campaigns = client.list_campaigns(ListOptions::default()).await.unwrap();
    assert_eq!(campaigns.len(), 1);
    assert_eq!(campaigns[0].name, "Q3 DACH");
}

#[tokio::test]
async fn missing_occurred_at_rejects_without_opt_in() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [{"id": "evt-1", "event_type": "open"}]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .pull_events(PullQuery::default(), PullOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SmartleadError::MissingOccurredAt { .. }));
}

#[tokio::test]
async fn assume_now_fills_every_missing_timestamp_with_one_instant() {
    let simulated: DateTime<Utc> = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "events": [
                {"id": "evt-1", "event_type": "open"},
                {"id": "evt-2", "event_type": "click"},
                {"id": "evt-3", "event_type": "open", "occurred_at": "2025-06-01T09:00:00Z"},
            ]
        })))
        .mount(&server)
        .await;

    let client = SmartleadClient::with_clock(
        SmartleadConfig::new(server.uri(), "test-key"),
        Arc::new(FixedClock::new(simulated)),
    );
    let outcome = client
        .pull_events(
            PullQuery::default(),
            PullOptions {
                assume_now_occurred_at: true,
                ..PullOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.filled_occurred_at, 2);
    // Filled events share the single per-pull capture instant.
    assert_eq!(outcome.events[0].occurred_at, simulated);
    assert_eq!(outcome.events[1].occurred_at, simulated);
    // Events with their own timestamp keep it.
    assert_ne!(outcome.events[2].occurred_at, simulated);
}
