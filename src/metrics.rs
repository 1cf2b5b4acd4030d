//! Prometheus metrics for routegate
//!
//! Tracks:
//! - Route outcomes by error kind and route latency
//! - Cache lookups by result
//! - Retry attempts and batch sizes
//! - Circuit breaker rejections and rate-limit denials
//! - Alerts raised by the performance monitor
//!
//! Exposed via the `/metrics` endpoint in Prometheus text format.

use crate::error::ErrorKind;
use crate::monitoring::alerts::{MetricName, Severity};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Cache lookup result for type-safe metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    /// Entry present but unreadable (decompression or decode failed)
    Error,
}

impl CacheLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Error => "error",
        }
    }
}

/// Metrics collector for routegate
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    route_outcomes: IntCounterVec,
    route_duration: HistogramVec,
    cache_lookups: IntCounterVec,
    retry_attempts: IntCounter,
    batch_size: Histogram,
    circuit_rejections: IntCounterVec,
    rate_limit_denials: IntCounter,
    alerts: IntCounterVec,
    background_task_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 5 error kinds
        let route_outcomes = IntCounterVec::new(
            Opts::new(
                "routegate_route_outcomes_total",
                "Total route calls by outcome error kind (none = success)",
            ),
            &["error_kind"],
        )?;

        let route_duration = HistogramVec::new(
            HistogramOpts::new(
                "routegate_route_duration_ms",
                "End-to-end route latency in milliseconds",
            )
            .buckets(vec![
                0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
            ]),
            &["cache"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "routegate_cache_lookups_total",
                "Response cache lookups by result",
            ),
            &["result"],
        )?;

        let retry_attempts = IntCounter::with_opts(Opts::new(
            "routegate_retry_attempts_total",
            "Upstream attempts beyond the first, across all route calls",
        ))?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "routegate_batch_size",
                "Number of requests coalesced into each upstream dispatch",
            )
            .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0]),
        )?;

        // Cardinality: one series per configured upstream
        let circuit_rejections = IntCounterVec::new(
            Opts::new(
                "routegate_circuit_rejections_total",
                "Requests rejected without a network call because the circuit was open",
            ),
            &["upstream"],
        )?;

        // No tenant label: tenant ids are unbounded
        let rate_limit_denials = IntCounter::with_opts(Opts::new(
            "routegate_rate_limit_denials_total",
            "Requests denied by the per-tenant rate limiter",
        ))?;

        let alerts = IntCounterVec::new(
            Opts::new(
                "routegate_alerts_total",
                "Threshold alerts raised by the performance monitor",
            ),
            &["metric", "severity"],
        )?;

        let background_task_failures = IntCounterVec::new(
            Opts::new(
                "routegate_background_task_failures_total",
                "Background task failures (cache warmer, batch dispatch) by task",
            ),
            &["task"],
        )?;

        registry.register(Box::new(route_outcomes.clone()))?;
        registry.register(Box::new(route_duration.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(retry_attempts.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(circuit_rejections.clone()))?;
        registry.register(Box::new(rate_limit_denials.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(background_task_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            route_outcomes,
            route_duration,
            cache_lookups,
            retry_attempts,
            batch_size,
            circuit_rejections,
            rate_limit_denials,
            alerts,
            background_task_failures,
        })
    }

    /// Record the outcome and latency of one route call
    ///
    /// # Errors
    ///
    /// Returns an error if `latency_ms` is NaN, infinite, or negative. Such
    /// values would corrupt every percentile of the histogram.
    pub fn record_route(
        &self,
        kind: ErrorKind,
        latency_ms: f64,
        cache_hit: bool,
    ) -> Result<(), prometheus::Error> {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite and non-negative, got: {}",
                latency_ms
            )));
        }

        self.route_outcomes
            .get_metric_with_label_values(&[kind.as_str()])?
            .inc();
        let cache_label = if cache_hit { "hit" } else { "miss" };
        self.route_duration
            .get_metric_with_label_values(&[cache_label])?
            .observe(latency_ms);
        Ok(())
    }

    pub fn cache_lookup(&self, result: CacheLookup) {
        self.cache_lookups.with_label_values(&[result.as_str()]).inc();
    }

    /// Record `extra` attempts beyond the first
    pub fn retry_attempts(&self, extra: u64) {
        if extra > 0 {
            self.retry_attempts.inc_by(extra);
        }
    }

    pub fn batch_dispatched(&self, size: usize) {
        self.batch_size.observe(size as f64);
    }

    pub fn circuit_rejected(&self, upstream: &str) {
        self.circuit_rejections.with_label_values(&[upstream]).inc();
    }

    pub fn rate_limited(&self) {
        self.rate_limit_denials.inc();
    }

    pub fn alert_raised(&self, metric: MetricName, severity: Severity) {
        self.alerts
            .with_label_values(&[metric.as_str(), severity.as_str()])
            .inc();
    }

    pub fn background_task_failure(&self, task: &str) {
        self.background_task_failures.with_label_values(&[task]).inc();
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        encoder.encode(&metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            prometheus::Error::Msg(format!(
                "Failed to encode {} metric families: {}",
                metric_count, e
            ))
        })?;

        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                e.utf8_error().valid_up_to(),
                e
            ))
        })
    }
}
