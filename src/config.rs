//! Configuration management for routegate
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Every section except `[upstream]` is optional and falls back to documented
//! defaults. `Config::validate()` rejects values that would make a component
//! misbehave at runtime, so invalid configuration fails at startup.

use crate::error::{AppError, AppResult};
use crate::gateway::TaskType;
use crate::monitoring::alerts::{AlertThreshold, Comparison, MetricName, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable consulted when `upstream.api_key` is not set
pub const API_KEY_ENV: &str = "ROUTEGATE_API_KEY";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration for the gateway binary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// The single upstream routing provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Name used to key the circuit breaker and label logs
    #[serde(default = "default_upstream_name")]
    pub name: String,
    pub base_url: String,
    /// Bearer credential. Falls back to `ROUTEGATE_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl UpstreamConfig {
    /// Resolve the credential from config or environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// URL for single completions
    pub fn route_url(&self) -> String {
        format!("{}/route", self.base_url.trim_end_matches('/'))
    }

    /// URL for coalesced batch completions
    pub fn batch_url(&self) -> String {
        format!("{}/route/batch", self.base_url.trim_end_matches('/'))
    }

    /// URL used by the health ping
    pub fn health_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.health_path.trim_start_matches('/')
        )
    }
}

fn default_upstream_name() -> String {
    "router".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// Task type to model mapping
///
/// The model name is passed to the upstream as a hint and is part of the
/// cache key. Task types missing from the map use `default_model`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub task_models: BTreeMap<TaskType, String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            task_models: BTreeMap::new(),
        }
    }
}

impl ModelsConfig {
    /// Model hint for a task type
    pub fn model_for(&self, task_type: TaskType) -> &str {
        self.task_models
            .get(&task_type)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

fn default_model() -> String {
    "auto".to_string()
}

/// Connection pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Low-level retries for connect errors only
    #[serde(default = "default_pool_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_pool_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_retries: default_pool_max_retries(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            retry_delay_ms: default_pool_retry_delay_ms(),
        }
    }
}

fn default_pool_size() -> usize {
    10
}

fn default_pool_max_retries() -> u32 {
    2
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_pool_retry_delay_ms() -> u64 {
    50
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

/// Per-tenant admission control
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_rph")]
    pub requests_per_hour: u32,
    #[serde(default = "default_rpd")]
    pub requests_per_day: u32,
    /// Token bucket capacity
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    /// Token refill rate. Defaults to `requests_per_minute / 60`.
    #[serde(default)]
    pub refill_per_second: Option<f64>,
    #[serde(default = "default_max_tenants")]
    pub max_tenants: usize,
    #[serde(default = "default_tenant_idle_ttl_secs")]
    pub tenant_idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            requests_per_hour: default_rph(),
            requests_per_day: default_rpd(),
            burst_capacity: default_burst_capacity(),
            refill_per_second: None,
            max_tenants: default_max_tenants(),
            tenant_idle_ttl_secs: default_tenant_idle_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Effective token refill rate in tokens per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_per_second
            .unwrap_or(self.requests_per_minute as f64 / 60.0)
    }

    pub fn tenant_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.tenant_idle_ttl_secs)
    }
}

fn default_rpm() -> u32 {
    60
}

fn default_rph() -> u32 {
    1_000
}

fn default_rpd() -> u32 {
    10_000
}

fn default_burst_capacity() -> u32 {
    10
}

fn default_max_tenants() -> usize {
    10_000
}

fn default_tenant_idle_ttl_secs() -> u64 {
    3_600
}

/// Operation-level retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
            jitter: true,
            jitter_factor: default_jitter_factor(),
        }
    }
}

fn default_retry_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

/// Request coalescing windows
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub enable_batching: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Requests submitted this long after a window opened start the next one
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
    /// Hard cap on how long the first request of a window waits
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enable_batching: false,
            batch_size: default_batch_size(),
            wait_time_ms: default_wait_time_ms(),
            max_wait_time_ms: default_max_wait_time_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_wait_time_ms() -> u64 {
    50
}

fn default_max_wait_time_ms() -> u64 {
    200
}

/// Representative prompt used to warm the cache
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WarmPrompt {
    pub prompt: String,
    #[serde(default)]
    pub task_type: TaskType,
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    #[serde(default)]
    pub warm_on_startup: bool,
    #[serde(default = "default_warm_prompts")]
    pub warm_prompts: Vec<WarmPrompt>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
            compression_level: default_compression_level(),
            warm_on_startup: false,
            warm_prompts: default_warm_prompts(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_cache_ttl_secs() -> u64 {
    3_600
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_compression_level() -> i32 {
    3
}

fn default_warm_prompts() -> Vec<WarmPrompt> {
    vec![
        WarmPrompt {
            prompt: "Summarize the key points of this conversation.".to_string(),
            task_type: TaskType::DocumentSummary,
        },
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

/// Performance monitor and alerting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Ring buffer size for request samples
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_max_recent_alerts")]
    pub max_recent_alerts: usize,
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<AlertThreshold>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            max_recent_alerts: default_max_recent_alerts(),
            alert_thresholds: default_alert_thresholds(),
        }
    }
}

fn default_window_size() -> usize {
    1_000
}

fn default_max_recent_alerts() -> usize {
    100
}

fn default_alert_thresholds() -> Vec<AlertThreshold> {
    vec![
        AlertThreshold {
            metric_name: MetricName::LatencyP95,
            threshold_value: 5_000.0,
            comparison: Comparison::Gt,
            severity: Severity::Warning,
        },
        AlertThreshold {
            metric_name: MetricName::ErrorRatePercent,
            threshold_value: 10.0,
            comparison: Comparison::Gt,
            severity: Severity::Critical,
        },
        AlertThreshold {
            metric_name: MetricName::CacheHitRatePercent,
            threshold_value: 10.0,
            comparison: Comparison::Lt,
            severity: Severity::Info,
        },
    ]
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Minimal valid configuration pointing at `base_url`, all other sections default
    pub fn for_upstream(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                name: default_upstream_name(),
                base_url: base_url.into(),
                api_key: None,
                request_timeout_ms: default_request_timeout_ms(),
                health_path: default_health_path(),
            },
            models: ModelsConfig::default(),
            pool: PoolConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            batching: BatchingConfig::default(),
            cache: CacheConfig::default(),
            monitoring: MonitoringConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and by `Gateway::new()`.
    pub fn validate(&self) -> AppResult<()> {
        let upstream = &self.upstream;
        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            return Err(AppError::Config(format!(
                "upstream.base_url '{}' must start with 'http://' or 'https://'",
                upstream.base_url
            )));
        }
        if upstream.name.trim().is_empty() {
            return Err(AppError::Config(
                "upstream.name must not be empty".to_string(),
            ));
        }
        if upstream.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "upstream.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.pool.pool_size == 0 {
            return Err(AppError::Config(
                "pool.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.pool.acquire_timeout_ms == 0 {
            return Err(AppError::Config(
                "pool.acquire_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
            return Err(AppError::Config(format!(
                "circuit_breaker thresholds must be greater than 0 (failure_threshold={}, success_threshold={})",
                breaker.failure_threshold, breaker.success_threshold
            )));
        }

        let limits = &self.rate_limit;
        for (name, value) in [
            ("requests_per_minute", limits.requests_per_minute),
            ("requests_per_hour", limits.requests_per_hour),
            ("requests_per_day", limits.requests_per_day),
            ("burst_capacity", limits.burst_capacity),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "rate_limit.{} must be greater than 0",
                    name
                )));
            }
        }
        let refill = limits.refill_rate();
        if !refill.is_finite() || refill <= 0.0 {
            return Err(AppError::Config(format!(
                "rate_limit.refill_per_second must be a positive finite number, got {}",
                refill
            )));
        }
        if limits.max_tenants == 0 {
            return Err(AppError::Config(
                "rate_limit.max_tenants must be greater than 0".to_string(),
            ));
        }

        let retry = &self.retry;
        if !retry.exponential_base.is_finite() || retry.exponential_base < 1.0 {
            return Err(AppError::Config(format!(
                "retry.exponential_base must be a finite number >= 1.0, got {}",
                retry.exponential_base
            )));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(AppError::Config(format!(
                "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
                retry.base_delay_ms, retry.max_delay_ms
            )));
        }
        if !retry.jitter_factor.is_finite() || !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(AppError::Config(format!(
                "retry.jitter_factor must be between 0.0 and 1.0, got {}",
                retry.jitter_factor
            )));
        }

        let batching = &self.batching;
        if batching.batch_size == 0 {
            return Err(AppError::Config(
                "batching.batch_size must be greater than 0".to_string(),
            ));
        }
        if batching.wait_time_ms > batching.max_wait_time_ms {
            return Err(AppError::Config(format!(
                "batching.wait_time_ms ({}) cannot exceed batching.max_wait_time_ms ({})",
                batching.wait_time_ms, batching.max_wait_time_ms
            )));
        }

        let cache = &self.cache;
        if cache.enabled && (cache.ttl_secs == 0 || cache.max_entries == 0) {
            return Err(AppError::Config(
                "cache.ttl_secs and cache.max_entries must be greater than 0 when the cache is enabled"
                    .to_string(),
            ));
        }
        if !(1..=22).contains(&cache.compression_level) {
            return Err(AppError::Config(format!(
                "cache.compression_level must be between 1 and 22, got {}",
                cache.compression_level
            )));
        }

        if self.monitoring.window_size == 0 {
            return Err(AppError::Config(
                "monitoring.window_size must be greater than 0".to_string(),
            ));
        }
        for threshold in &self.monitoring.alert_thresholds {
            if !threshold.threshold_value.is_finite() {
                return Err(AppError::Config(format!(
                    "alert threshold for {} must be finite, got {}",
                    threshold.metric_name.as_str(),
                    threshold.threshold_value
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    /// Parse and validate configuration from a TOML string
    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }
}
