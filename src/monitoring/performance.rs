//! Rolling performance snapshots
//!
//! Each recorded request lands in a fixed-size ring buffer and the snapshot
//! is recomputed from the buffer. Process memory and CPU are sampled with
//! `sysinfo` at most once per second.

use crate::metrics::Metrics;
use crate::monitoring::alerts::{Alert, AlertManager, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::time::Instant;

const SYSTEM_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    latency_ms: f64,
    success: bool,
    cache_hit: bool,
}

/// Aggregates over the current window of samples
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub throughput_rps: f64,
    pub error_rate_percent: f64,
    pub cache_hit_rate_percent: f64,
    pub memory_usage_mb: f64,
    pub cpu_usage_percent: f64,
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSnapshot {
    pub fn empty() -> Self {
        Self {
            latency_p50_ms: 0.0,
            latency_p95_ms: 0.0,
            latency_p99_ms: 0.0,
            throughput_rps: 0.0,
            error_rate_percent: 0.0,
            cache_hit_rate_percent: 0.0,
            memory_usage_mb: 0.0,
            cpu_usage_percent: 0.0,
            sample_count: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Lifetime counters, not limited to the window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub tokens_used: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceDashboard {
    pub snapshot: PerformanceSnapshot,
    pub recent_alerts: Vec<Alert>,
    pub totals: Totals,
    pub uptime_secs: u64,
}

struct WindowState {
    samples: VecDeque<Sample>,
    latest: PerformanceSnapshot,
    recent_alerts: VecDeque<Alert>,
    totals: Totals,
}

struct SystemSampler {
    system: System,
    pid: Option<Pid>,
    sampled_at: Option<Instant>,
    memory_mb: f64,
    cpu_percent: f64,
}

impl SystemSampler {
    fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Process id unavailable, memory and CPU will read 0");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
            sampled_at: None,
            memory_mb: 0.0,
            cpu_percent: 0.0,
        }
    }

    fn sample(&mut self, now: Instant) -> (f64, f64) {
        let fresh = self
            .sampled_at
            .is_some_and(|at| now.saturating_duration_since(at) < SYSTEM_SAMPLE_INTERVAL);
        if fresh {
            return (self.memory_mb, self.cpu_percent);
        }
        self.sampled_at = Some(now);

        if let Some(pid) = self.pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                self.memory_mb = process.memory() as f64 / (1024.0 * 1024.0);
                self.cpu_percent = f64::from(process.cpu_usage());
            }
        }
        (self.memory_mb, self.cpu_percent)
    }
}

pub struct PerformanceMonitor {
    window_size: usize,
    max_recent_alerts: usize,
    alerts: AlertManager,
    state: Mutex<WindowState>,
    system: Mutex<SystemSampler>,
    started: Instant,
    metrics: Option<Arc<Metrics>>,
}

impl PerformanceMonitor {
    pub fn new(window_size: usize, max_recent_alerts: usize, alerts: AlertManager) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            max_recent_alerts,
            alerts,
            state: Mutex::new(WindowState {
                samples: VecDeque::with_capacity(window_size),
                latest: PerformanceSnapshot::empty(),
                recent_alerts: VecDeque::new(),
                totals: Totals::default(),
            }),
            system: Mutex::new(SystemSampler::new()),
            started: Instant::now(),
            metrics: None,
        }
    }

    pub fn from_config(config: &crate::config::MonitoringConfig) -> Self {
        Self::new(
            config.window_size,
            config.max_recent_alerts,
            AlertManager::new(config.alert_thresholds.clone()),
        )
    }

    /// Count raised alerts in Prometheus as well
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn state(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one request and recompute the snapshot
    ///
    /// Returns the alerts raised by the new snapshot.
    pub fn record_request_metrics(
        &self,
        latency_ms: f64,
        tokens: u64,
        cost: f64,
        success: bool,
        cache_hit: bool,
    ) -> Vec<Alert> {
        let now = Instant::now();
        let (memory_mb, cpu_percent) = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .sample(now);

        let latency_ms = if latency_ms.is_finite() {
            latency_ms.max(0.0)
        } else {
            0.0
        };

        let alerts = {
            let mut state = self.state();
            if state.samples.len() == self.window_size {
                state.samples.pop_front();
            }
            state.samples.push_back(Sample {
                at: now,
                latency_ms,
                success,
                cache_hit,
            });

            let totals = &mut state.totals;
            totals.requests += 1;
            if success {
                totals.successes += 1;
            } else {
                totals.failures += 1;
            }
            if cache_hit {
                totals.cache_hits += 1;
            }
            totals.tokens_used += tokens;
            if cost.is_finite() {
                totals.estimated_cost += cost;
            }

            let snapshot = compute_snapshot(&state.samples, now, memory_mb, cpu_percent);
            let alerts = self.alerts.check_alerts(&snapshot);
            state.latest = snapshot;

            for alert in &alerts {
                if state.recent_alerts.len() == self.max_recent_alerts {
                    state.recent_alerts.pop_front();
                }
                if self.max_recent_alerts > 0 {
                    state.recent_alerts.push_back(alert.clone());
                }
            }
            alerts
        };

        for alert in &alerts {
            log_alert(alert);
            if let Some(metrics) = &self.metrics {
                metrics.alert_raised(alert.metric_name, alert.severity);
            }
        }
        alerts
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.state().latest.clone()
    }

    pub fn get_performance_dashboard(&self) -> PerformanceDashboard {
        let state = self.state();
        PerformanceDashboard {
            snapshot: state.latest.clone(),
            recent_alerts: state.recent_alerts.iter().cloned().collect(),
            totals: state.totals.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

fn compute_snapshot(
    samples: &VecDeque<Sample>,
    now: Instant,
    memory_mb: f64,
    cpu_percent: f64,
) -> PerformanceSnapshot {
    let count = samples.len();
    if count == 0 {
        return PerformanceSnapshot {
            memory_usage_mb: memory_mb,
            cpu_usage_percent: cpu_percent,
            ..PerformanceSnapshot::empty()
        };
    }

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);

    let failures = samples.iter().filter(|s| !s.success).count();
    let hits = samples.iter().filter(|s| s.cache_hit).count();

    // Span covered by the window; under a second counts as one second
    let span = samples
        .front()
        .map(|oldest| now.saturating_duration_since(oldest.at))
        .unwrap_or_default()
        .max(Duration::from_secs(1));

    PerformanceSnapshot {
        latency_p50_ms: percentile(&latencies, 50.0),
        latency_p95_ms: percentile(&latencies, 95.0),
        latency_p99_ms: percentile(&latencies, 99.0),
        throughput_rps: count as f64 / span.as_secs_f64(),
        error_rate_percent: failures as f64 / count as f64 * 100.0,
        cache_hit_rate_percent: hits as f64 / count as f64 * 100.0,
        memory_usage_mb: memory_mb,
        cpu_usage_percent: cpu_percent,
        sample_count: count,
        timestamp: Utc::now(),
    }
}

/// Nearest-rank percentile over sorted values
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn log_alert(alert: &Alert) {
    macro_rules! emit {
        ($level:ident) => {
            tracing::$level!(
                metric = alert.metric_name.as_str(),
                severity = alert.severity.as_str(),
                value = alert.value,
                threshold = alert.threshold_value,
                "Performance alert"
            )
        };
    }

    match alert.severity {
        Severity::Critical => emit!(error),
        Severity::Warning => emit!(warn),
        Severity::Info => emit!(info),
    }
}
