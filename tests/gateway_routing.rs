//! End-to-end route behavior against a mock upstream
//!
//! Each test points a fresh gateway at a wiremock server. Mock expectations
//! (`expect(n)`) are verified when the server drops, so a test fails if the
//! gateway made more or fewer upstream calls than the scenario allows.

use routegate::config::Config;
use routegate::error::ErrorKind;
use routegate::gateway::{Gateway, RouteRequest, TaskType};
use routegate::resilience::CircuitState;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::for_upstream(server.uri());
    config.upstream.api_key = Some("test-key".to_string());
    config.pool.max_retries = 0;
    config.retry.max_retries = 0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.jitter = false;
    config
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "text": text,
        "tokens_used": 12,
        "cost": 0.001
    }))
}

fn request(prompt: &str) -> RouteRequest {
    RouteRequest::simple(prompt, TaskType::QuestionAnswer).expect("valid request")
}

#[tokio::test]
async fn test_identical_normalized_prompt_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(completion("Paris"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::new(test_config(&server)).unwrap();

    let first = gateway
        .route(request("What is the capital of France?"))
        .await;
    assert!(first.success, "first call failed: {:?}", first.error);
    assert!(!first.cache_hit);
    assert_eq!(first.response_text.as_deref(), Some("Paris"));
    assert_eq!(first.tokens_used, 12);

    let second = gateway
        .route(request("  what is the CAPITAL   of france?\n"))
        .await;
    assert!(second.success);
    assert!(second.cache_hit);
    assert_eq!(second.response_text.as_deref(), Some("Paris"));

    let stats = gateway.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);

    let dashboard = gateway.dashboard();
    assert_eq!(dashboard.totals.requests, 2);
    assert_eq!(dashboard.totals.cache_hits, 1);
}

#[tokio::test]
async fn test_breaker_opens_and_rejects_without_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.recovery_timeout_ms = 60_000;
    let gateway = Gateway::new(config).unwrap();

    for _ in 0..2 {
        let result = gateway.route(request("hello")).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, ErrorKind::Retryable);
    }

    let rejected = gateway.route(request("hello")).await;
    assert_eq!(rejected.error_kind, ErrorKind::UpstreamError);
    assert!(rejected.error.as_deref().unwrap_or_default().contains("open"));
    let retry_after = rejected.retry_after_ms.expect("retry-after on open circuit");
    assert!(retry_after > 59_000 && retry_after <= 60_000);

    let states = gateway.breaker_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].state, CircuitState::Open);
    assert!(!gateway.readiness().ready);
}

#[tokio::test]
async fn test_bad_request_does_not_trip_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(400).set_body_string("prompt rejected"))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.circuit_breaker.failure_threshold = 1;
    config.retry.max_retries = 3;
    let gateway = Gateway::new(config).unwrap();

    for _ in 0..3 {
        let result = gateway.route(request("hello")).await;
        assert_eq!(result.error_kind, ErrorKind::BadRequest);
        assert!(result.error.as_deref().unwrap_or_default().contains("prompt rejected"));
    }

    let states = gateway.breaker_states();
    assert_eq!(states[0].state, CircuitState::Closed);
    assert_eq!(states[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_burst_capacity_then_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(completion("ok"))
        .expect(6)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.cache.enabled = false;
    config.rate_limit.burst_capacity = 5;
    config.rate_limit.refill_per_second = Some(1.0);
    config.rate_limit.requests_per_minute = 1_000;
    let gateway = Gateway::new(config).unwrap();

    for i in 0..5 {
        let result = gateway.route(request("hello")).await;
        assert!(result.success, "call {} should pass: {:?}", i, result.error);
    }

    let denied = gateway.route(request("hello")).await;
    assert_eq!(denied.error_kind, ErrorKind::RateLimited);
    let retry_after = denied.retry_after_ms.expect("retry-after on denial");
    assert!(
        (500..=1000).contains(&retry_after),
        "retry_after_ms was {}",
        retry_after
    );

    // Other tenants have their own budget
    let other = RouteRequest::new("hello", TaskType::QuestionAnswer, "other", "w", 64, 0.2)
        .unwrap();
    assert!(gateway.route(other).await.success);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(completion("third time lucky"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_retries = 3;
    let gateway = Gateway::new(config).unwrap();

    let result = gateway.route(request("hello")).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.response_text.as_deref(), Some("third time lucky"));

    let metrics = gateway.metrics().gather().unwrap();
    assert!(metrics.contains("routegate_retry_attempts_total 2"));
    assert_eq!(gateway.breaker_states()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_exhausted_retries_report_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_retries = 2;
    let gateway = Gateway::new(config).unwrap();

    let result = gateway.route(request("hello")).await;
    assert_eq!(result.error_kind, ErrorKind::Retryable);
    assert!(result.error.as_deref().unwrap_or_default().contains("3 attempt"));
    assert_eq!(gateway.breaker_states()[0].consecutive_failures, 1);
}

#[tokio::test]
async fn test_malformed_success_body_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_retries = 3;
    let gateway = Gateway::new(config).unwrap();

    let result = gateway.route(request("hello")).await;
    assert_eq!(result.error_kind, ErrorKind::UpstreamError);
    assert_eq!(gateway.cache_stats().await.entries, 0);
}

#[tokio::test]
async fn test_wire_format_carries_model_hint_and_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .and(body_partial_json(json!({
            "model": "coder-30b",
            "prompt": "write a parser",
            "task_type": "code",
            "max_tokens": 256,
            "tenant_id": "acme",
            "workspace_id": "ws-1"
        })))
        .respond_with(completion("fn parse() {}"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config
        .models
        .task_models
        .insert(TaskType::Code, "coder-30b".to_string());
    let gateway = Gateway::new(config).unwrap();

    let result = gateway
        .route_prompt("write a parser", TaskType::Code, "acme", "ws-1", 256, 0.2)
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.model.as_deref(), Some("coder-30b"));
}

#[tokio::test]
async fn test_dropped_route_handle_still_records_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(completion("late").set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::new(test_config(&server)).unwrap();
    drop(gateway.route_async(request("hello")));

    tokio::time::sleep(Duration::from_millis(500)).await;

    let dashboard = gateway.dashboard();
    assert_eq!(dashboard.totals.requests, 1);
    assert_eq!(dashboard.totals.successes, 1);
    assert_eq!(gateway.cache_stats().await.entries, 1);
}

#[tokio::test]
async fn test_route_async_resolves_to_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(completion("async"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::new(test_config(&server)).unwrap();
    let result = gateway.route_async(request("hello")).await;
    assert!(result.success);
    assert_eq!(result.response_text.as_deref(), Some("async"));
}

#[tokio::test]
async fn test_cancellation_stops_retries_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_retries = 5;
    config.retry.base_delay_ms = 300;
    config.retry.max_delay_ms = 1_000;
    let gateway = Gateway::new(config).unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = gateway.route_with_cancel(request("hello"), &token).await;
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(result.error_kind, ErrorKind::Retryable);
    assert_eq!(result.error.as_deref(), Some("cancelled"));

    // Background dispatch sees the same token and stops before its next attempt
    tokio::time::sleep(Duration::from_millis(500)).await;
    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 1);
    assert_eq!(gateway.breaker_states()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn test_unreachable_upstream_is_retryable() {
    let mut config = Config::for_upstream("http://127.0.0.1:9");
    config.pool.max_retries = 0;
    config.retry.max_retries = 0;
    config.upstream.request_timeout_ms = 2_000;
    let gateway = Gateway::new(config).unwrap();

    let result = gateway.route(request("hello")).await;
    assert_eq!(result.error_kind, ErrorKind::Retryable);
}
