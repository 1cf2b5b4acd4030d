//! Command-line interface for routegate
//!
//! Provides argument parsing and subcommand handling for the routegate binary.

use clap::{Parser, Subcommand};

/// Resilient gateway in front of a model-routing provider
#[derive(Parser)]
#[command(name = "routegate")]
#[command(version)]
#[command(about = "Resilient gateway in front of a model-routing provider")]
#[command(
    long_about = "routegate fronts a remote model-routing provider with per-tenant rate \
    limiting, a circuit breaker, retries, request batching, a compressed response cache \
    and health monitoring."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# routegate configuration
#
# Every section except [upstream] is optional; omitted values use the
# defaults shown here.

[server]
# Address the HTTP server binds to
host = "0.0.0.0"
port = 3000

[upstream]
# Name keys the circuit breaker and labels logs
name = "router"
base_url = "http://localhost:8080"
# Bearer credential. Falls back to the ROUTEGATE_API_KEY environment variable.
# api_key = "..."
request_timeout_ms = 30000
health_path = "/health"

[models]
# Model hint sent upstream; also part of the cache key
default_model = "auto"

[models.task_models]
# code = "coder-30b"
# deep_analysis = "reasoner-120b"

[pool]
# Reusable HTTP sessions
pool_size = 10
# Retries for connect errors only
max_retries = 2
acquire_timeout_ms = 5000
retry_delay_ms = 50

[circuit_breaker]
failure_threshold = 5
success_threshold = 2
recovery_timeout_ms = 30000

[rate_limit]
# Per tenant
requests_per_minute = 60
requests_per_hour = 1000
requests_per_day = 10000
# Token bucket size; refill defaults to requests_per_minute / 60 per second
burst_capacity = 10
# refill_per_second = 1.0
max_tenants = 10000
tenant_idle_ttl_secs = 3600

[retry]
max_retries = 3
base_delay_ms = 100
max_delay_ms = 10000
exponential_base = 2.0
jitter = true
jitter_factor = 0.1

[batching]
enable_batching = false
batch_size = 10
# Requests within this long of a window's first request join it
wait_time_ms = 50
# Flush after this long since the first request of the window
max_wait_time_ms = 200

[cache]
enabled = true
ttl_secs = 3600
max_entries = 10000
# zstd level, 1-22
compression_level = 3
warm_on_startup = false

[[cache.warm_prompts]]
prompt = "What can you help me with?"
task_type = "casual_chat"

[monitoring]
# Requests kept for percentile and rate calculations
window_size = 1000
max_recent_alerts = 100

# metric_name: latency_p50 | latency_p95 | latency_p99 | throughput_rps |
#   error_rate_percent | cache_hit_rate_percent | memory_usage_mb | cpu_usage_percent
# comparison: gt | lt | gte | lte
# severity: info | warning | critical
[[monitoring.alert_thresholds]]
metric_name = "latency_p95"
threshold_value = 5000.0
comparison = "gt"
severity = "warning"

[[monitoring.alert_thresholds]]
metric_name = "error_rate_percent"
threshold_value = 10.0
comparison = "gt"
severity = "critical"

[observability]
# trace | debug | info | warn | error (RUST_LOG overrides)
log_level = "info"
"#
}
