//! HTTP surface tests: route, health, readiness, liveness, dashboard, metrics

use axum::body::Body;
use axum::http::{Request, StatusCode};
use routegate::config::Config;
use routegate::gateway::Gateway;
use routegate::handlers::{self, AppState};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app_for(config: Config) -> (axum::Router, Gateway) {
    let gateway = Gateway::new(config).unwrap();
    (handlers::router(AppState::new(gateway.clone())), gateway)
}

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::for_upstream(server.uri());
    config.upstream.api_key = Some("test-key".to_string());
    config.pool.max_retries = 0;
    config.retry.max_retries = 0;
    config
}

async fn mount_completion(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "hi there",
            "tokens_used": 4,
            "cost": 0.0002
        })))
        .mount(server)
        .await;
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}

async fn post_route(app: axum::Router, body: Value) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/route")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_liveness_always_alive_with_request_id() {
    let server = MockServer::start().await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, headers, body) = get(app, "/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_ready_with_closed_breaker_and_open_pool() {
    let server = MockServer::start().await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, body) = get(app, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_not_ready_after_shutdown() {
    let server = MockServer::start().await;
    let (app, gateway) = app_for(test_config(&server));
    gateway.shutdown().await;

    let (status, _, body) = get(app, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not_ready");
}

#[tokio::test]
async fn test_health_reports_upstream_ping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_healthy"], true);
    assert_eq!(body["status"], "healthy");
    let checks = body["checks"].as_array().unwrap();
    assert!(checks.iter().any(|c| c["name"] == "upstream" && c["healthy"] == true));
}

#[tokio::test]
async fn test_health_unhealthy_when_upstream_ping_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["overall_healthy"], false);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_route_success_returns_result_json() {
    let server = MockServer::start().await;
    mount_completion(&server).await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, body) = post_route(app, json!({ "prompt": "hello" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["response_text"], "hi there");
    assert_eq!(body["error_kind"], "none");
}

#[tokio::test]
async fn test_route_out_of_range_temperature_is_bad_request() {
    let server = MockServer::start().await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, body) =
        post_route(app, json!({ "prompt": "hello", "temperature": 5.0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "bad_request");
}

#[tokio::test]
async fn test_rate_limited_route_sets_retry_after() {
    let server = MockServer::start().await;
    mount_completion(&server).await;
    let mut config = test_config(&server);
    config.cache.enabled = false;
    config.rate_limit.burst_capacity = 1;
    config.rate_limit.refill_per_second = Some(0.5);
    let (app, _gateway) = app_for(config);

    let (first, _, _) = post_route(app.clone(), json!({ "prompt": "one" })).await;
    assert_eq!(first, StatusCode::OK);

    let (status, headers, body) = post_route(app, json!({ "prompt": "two" })).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error_kind"], "rate_limited");
    let retry_after: u64 = headers
        .get("retry-after")
        .expect("Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=2).contains(&retry_after));
}

#[tokio::test]
async fn test_metrics_exposes_route_outcomes() {
    let server = MockServer::start().await;
    mount_completion(&server).await;
    let (app, _gateway) = app_for(test_config(&server));

    let (status, _, _) = post_route(app.clone(), json!({ "prompt": "hello" })).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("routegate_route_outcomes_total"));
    assert!(text.contains("error_kind=\"none\""));
}

#[tokio::test]
async fn test_dashboard_combines_views() {
    let server = MockServer::start().await;
    mount_completion(&server).await;
    let (app, _gateway) = app_for(test_config(&server));

    post_route(app.clone(), json!({ "prompt": "hello" })).await;

    let (status, _, body) = get(app, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totals"]["requests"], 1);
    assert_eq!(body["totals"]["successes"], 1);
    assert!(body["snapshot"].is_object());
    assert_eq!(body["cache"]["entries"], 1);
    assert_eq!(body["tenants"], 1);
    assert!(body["circuit_breakers"].is_array());
}
