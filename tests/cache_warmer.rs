//! Cache warming through the full gateway pipeline

use routegate::cache::{CacheWarmer, WARMER_TENANT, WarmReport};
use routegate::config::{Config, WarmPrompt};
use routegate::gateway::{Gateway, RouteRequest, TaskType};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn warm_prompts() -> Vec<WarmPrompt> {
    vec![
        WarmPrompt {
            prompt: "What can you help me with?".to_string(),
            task_type: TaskType::CasualChat,
        },
        WarmPrompt {
            prompt: "Explain the main risks in this plan.".to_string(),
            task_type: TaskType::DeepAnalysis,
        },
    ]
}

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::for_upstream(server.uri());
    config.pool.max_retries = 0;
    config.retry.max_retries = 0;
    config.cache.warm_prompts = warm_prompts();
    config
}

async fn mount_completion(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/route"))
        .and(body_partial_json(json!({ "tenant_id": WARMER_TENANT })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "warm",
            "tokens_used": 2,
            "cost": 0.0
        })))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_second_warm_finds_everything_cached() {
    let server = MockServer::start().await;
    mount_completion(&server, 2).await;

    let gateway = Gateway::new(test_config(&server)).unwrap();
    let warmer = CacheWarmer::from_config(&gateway.config().cache);

    let first = warmer.warm(&gateway).await;
    assert_eq!(
        first,
        WarmReport {
            attempted: 2,
            warmed: 2,
            already_cached: 0,
            failed: 0
        }
    );

    let second = warmer.warm(&gateway).await;
    assert_eq!(second.already_cached, 2);
    assert_eq!(second.warmed, 0);
}

#[tokio::test]
async fn test_warmed_entry_serves_other_tenants() {
    let server = MockServer::start().await;
    mount_completion(&server, 2).await;

    let gateway = Gateway::new(test_config(&server)).unwrap();
    CacheWarmer::from_config(&gateway.config().cache)
        .warm(&gateway)
        .await;

    let request = RouteRequest::new(
        "what can you help me with?",
        TaskType::CasualChat,
        "tenant-a",
        "default",
        512,
        0.7,
    )
    .unwrap();
    let result = gateway.route(request).await;
    assert!(result.success);
    assert!(result.cache_hit);
}

#[tokio::test]
async fn test_failed_warm_is_counted_not_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = Gateway::new(test_config(&server)).unwrap();
    let report = CacheWarmer::from_config(&gateway.config().cache)
        .spawn(gateway.clone())
        .await
        .unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.warmed, 0);

    let metrics = gateway.metrics().gather().unwrap();
    assert!(metrics.contains("routegate_background_task_failures_total{task=\"cache_warmer\"} 1"));
}

#[tokio::test]
async fn test_warm_on_startup_populates_cache() {
    let server = MockServer::start().await;
    mount_completion(&server, 2).await;

    let mut config = test_config(&server);
    config.cache.warm_on_startup = true;
    let gateway = Gateway::new(config).unwrap();

    let mut entries = 0;
    for _ in 0..50 {
        entries = gateway.cache_stats().await.entries;
        if entries == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(entries, 2);
}
