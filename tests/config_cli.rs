//! Configuration loading and the `routegate config` template
//!
//! Covers the file path through `Config::from_file`, including each error
//! variant a bad file can produce.

use routegate::cli::generate_config_template;
use routegate::config::Config;
use routegate::error::AppError;
use routegate::gateway::TaskType;
use std::fs;
use tempfile::TempDir;

fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

#[test]
fn test_generated_template_loads_from_file() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, generate_config_template()).expect("Failed to write template");

    let config = Config::from_file(&config_path).expect("template should load");
    assert_eq!(config.upstream.base_url, "http://localhost:8080");
    assert_eq!(config.rate_limit.burst_capacity, 10);
    assert!((config.rate_limit.refill_rate() - 1.0).abs() < f64::EPSILON);
    assert!(!config.batching.enable_batching);
    assert_eq!(config.cache.compression_level, 3);
    assert_eq!(config.cache.warm_prompts[0].task_type, TaskType::CasualChat);
}

#[test]
fn test_template_has_every_section() {
    let template = generate_config_template();
    for section in [
        "[server]",
        "[upstream]",
        "[models]",
        "[pool]",
        "[circuit_breaker]",
        "[rate_limit]",
        "[retry]",
        "[batching]",
        "[cache]",
        "[monitoring]",
        "[observability]",
    ] {
        assert!(template.contains(section), "Missing {}", section);
    }
}

#[test]
fn test_minimal_file_uses_defaults() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("minimal.toml");
    fs::write(
        &config_path,
        "[upstream]\nbase_url = \"https://router.example.com\"\n",
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    assert_eq!(config.upstream.name, "router");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.retry.max_retries, 3);
    assert!(config.cache.enabled);
}

#[test]
fn test_missing_file_reports_read_error_with_path() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("absent.toml");

    let err = Config::from_file(&config_path).unwrap_err();
    match err {
        AppError::ConfigFileRead { path, .. } => assert!(path.ends_with("absent.toml")),
        other => panic!("expected ConfigFileRead, got {:?}", other),
    }
}

#[test]
fn test_malformed_toml_reports_parse_error() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("broken.toml");
    fs::write(&config_path, "[upstream\nbase_url = ").unwrap();

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(matches!(err, AppError::ConfigParseFailed { .. }), "{:?}", err);
}

#[test]
fn test_invalid_value_reports_validation_error() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("invalid.toml");
    fs::write(
        &config_path,
        "[upstream]\nbase_url = \"http://localhost:8080\"\n\n[retry]\njitter_factor = 1.5\n",
    )
    .unwrap();

    let err = Config::from_file(&config_path).unwrap_err();
    match err {
        AppError::ConfigValidationFailed { reason, .. } => {
            assert!(reason.contains("jitter_factor"), "reason: {}", reason)
        }
        other => panic!("expected ConfigValidationFailed, got {:?}", other),
    }
}

#[test]
fn test_non_http_base_url_is_rejected() {
    let err = "[upstream]\nbase_url = \"ftp://router\"\n"
        .parse::<Config>()
        .unwrap_err();
    assert!(err.to_string().contains("base_url"));
}
