//! Health, readiness and liveness probes
//!
//! [`HealthChecker`] runs named sub-checks. Credentials and the model map
//! are checked locally; the upstream check pings its health URL through
//! the connection pool. [`HealthEndpoint`] combines those checks with
//! breaker and pool state into the records served at `/health`, `/ready`
//! and `/live`.
//!
//! A missing credential is reported but is not critical, since the upstream
//! may not require one. It degrades the status without making the gateway
//! unhealthy or unready.

use crate::config::ModelsConfig;
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
use crate::upstream::{PoolStats, UpstreamClient};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Outcome of one named sub-check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    /// A failed critical check makes the gateway unhealthy
    pub critical: bool,
    pub message: String,
    pub duration_ms: f64,
}

impl CheckResult {
    fn pass(name: &str, critical: bool, message: impl Into<String>, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            critical,
            message: message.into(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    fn fail(name: &str, critical: bool, message: impl Into<String>, started: Instant) -> Self {
        Self {
            healthy: false,
            ..Self::pass(name, critical, message, started)
        }
    }
}

/// Status implied by a set of sub-checks
pub fn aggregate_status(checks: &[CheckResult]) -> HealthStatus {
    if checks.iter().any(|c| !c.healthy && c.critical) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| !c.healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub overall_healthy: bool,
    pub checks: Vec<CheckResult>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let status = aggregate_status(&checks);
        Self {
            status,
            overall_healthy: status != HealthStatus::Unhealthy,
            checks,
            timestamp: Utc::now(),
        }
    }
}

/// Runs the gateway's sub-checks
pub struct HealthChecker {
    client: UpstreamClient,
    models: ModelsConfig,
}

impl HealthChecker {
    pub fn new(client: UpstreamClient, models: ModelsConfig) -> Self {
        Self { client, models }
    }

    /// Credentials, model map and upstream ping
    pub async fn check(&self) -> HealthReport {
        let mut checks = self.local_checks();
        checks.push(self.check_upstream().await);
        let report = HealthReport::from_checks(checks);
        if !report.overall_healthy {
            tracing::warn!(status = report.status.as_str(), "Health check failed");
        }
        report
    }

    /// Credentials and model map only; no network
    pub fn quick_health(&self) -> HealthReport {
        HealthReport::from_checks(self.local_checks())
    }

    fn local_checks(&self) -> Vec<CheckResult> {
        vec![self.check_credentials(), self.check_model_map()]
    }

    fn check_credentials(&self) -> CheckResult {
        let started = Instant::now();
        match self.client.config().resolved_api_key() {
            Some(_) => CheckResult::pass("credentials", false, "API key configured", started),
            None => CheckResult::fail(
                "credentials",
                false,
                format!(
                    "No API key configured (set upstream.api_key or {})",
                    crate::config::API_KEY_ENV
                ),
                started,
            ),
        }
    }

    fn check_model_map(&self) -> CheckResult {
        let started = Instant::now();
        if self.models.default_model.trim().is_empty() {
            return CheckResult::fail("model_map", true, "default_model is empty", started);
        }
        let empty: Vec<&str> = self
            .models
            .task_models
            .iter()
            .filter(|(_, model)| model.trim().is_empty())
            .map(|(task, _)| task.as_str())
            .collect();
        if !empty.is_empty() {
            return CheckResult::fail(
                "model_map",
                true,
                format!("empty model name for task types: {}", empty.join(", ")),
                started,
            );
        }
        CheckResult::pass(
            "model_map",
            true,
            format!(
                "default model '{}', {} task override(s)",
                self.models.default_model,
                self.models.task_models.len()
            ),
            started,
        )
    }

    async fn check_upstream(&self) -> CheckResult {
        let started = Instant::now();
        match self.client.ping().await {
            Ok(latency) => CheckResult::pass(
                "upstream",
                true,
                format!("{} responded in {}ms", self.client.name(), latency.as_millis()),
                started,
            ),
            Err(e) => CheckResult::fail(
                "upstream",
                true,
                format!("{} unreachable: {}", self.client.name(), e),
                started,
            ),
        }
    }
}

/// Detailed record served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealth {
    pub status: HealthStatus,
    pub overall_healthy: bool,
    pub checks: Vec<CheckResult>,
    pub circuit_breakers: Vec<BreakerSnapshot>,
    pub pool: PoolStats,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub ready: bool,
    pub checks: Vec<CheckResult>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

/// Probe records combining sub-checks with breaker and pool state
pub struct HealthEndpoint {
    checker: HealthChecker,
    breaker: CircuitBreaker,
    breakers: CircuitBreakerRegistry,
    client: UpstreamClient,
    started: Instant,
}

impl HealthEndpoint {
    pub fn new(
        checker: HealthChecker,
        breakers: CircuitBreakerRegistry,
        client: UpstreamClient,
    ) -> Self {
        Self {
            breaker: breakers.get(client.name()),
            checker,
            breakers,
            client,
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub async fn health_check(&self) -> DetailedHealth {
        let report = self.checker.check().await;
        let mut status = report.status;
        // An open circuit with passing checks means the upstream only just recovered
        if status == HealthStatus::Healthy && self.breaker.state() == CircuitState::Open {
            status = HealthStatus::Degraded;
        }
        DetailedHealth {
            status,
            overall_healthy: report.overall_healthy,
            checks: report.checks,
            circuit_breakers: self.breakers.snapshots(),
            pool: self.client.pool_stats(),
            uptime_secs: self.uptime_secs(),
            timestamp: report.timestamp,
        }
    }

    /// Ready when the quick checks pass, the upstream breaker is not open,
    /// and the pool accepts requests
    pub fn readiness_check(&self) -> ReadinessReport {
        let mut checks = self.checker.quick_health().checks;

        let started = Instant::now();
        let state = self.breaker.state();
        checks.push(if state == CircuitState::Open {
            CheckResult::fail(
                "circuit_breaker",
                true,
                format!("circuit for {} is open", self.breaker.upstream()),
                started,
            )
        } else {
            CheckResult::pass("circuit_breaker", true, state.as_str(), started)
        });

        let started = Instant::now();
        checks.push(if self.client.is_closed() {
            CheckResult::fail("connection_pool", true, "pool is closed", started)
        } else {
            let stats = self.client.pool_stats();
            CheckResult::pass(
                "connection_pool",
                true,
                format!("{}/{} sessions available", stats.available_sessions, stats.pool_size),
                started,
            )
        });

        let ready = aggregate_status(&checks) != HealthStatus::Unhealthy;
        ReadinessReport {
            status: if ready { "ready" } else { "not_ready" },
            ready,
            checks,
            timestamp: Utc::now(),
        }
    }

    pub fn liveness_check(&self) -> LivenessReport {
        LivenessReport {
            status: "alive",
            uptime_secs: self.uptime_secs(),
            timestamp: Utc::now(),
        }
    }
}
