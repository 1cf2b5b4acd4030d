//! Threshold alerting over performance snapshots
//!
//! Alerts are derived, not stored: every check of a snapshot emits one alert
//! per violated threshold. Repeated violations emit repeated alerts.

use crate::monitoring::performance::PerformanceSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot field a threshold is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    LatencyP50,
    LatencyP95,
    LatencyP99,
    ThroughputRps,
    ErrorRatePercent,
    CacheHitRatePercent,
    MemoryUsageMb,
    CpuUsagePercent,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LatencyP50 => "latency_p50",
            Self::LatencyP95 => "latency_p95",
            Self::LatencyP99 => "latency_p99",
            Self::ThroughputRps => "throughput_rps",
            Self::ErrorRatePercent => "error_rate_percent",
            Self::CacheHitRatePercent => "cache_hit_rate_percent",
            Self::MemoryUsageMb => "memory_usage_mb",
            Self::CpuUsagePercent => "cpu_usage_percent",
        }
    }

    /// Read this metric from a snapshot
    pub fn value_in(&self, snapshot: &PerformanceSnapshot) -> f64 {
        match self {
            Self::LatencyP50 => snapshot.latency_p50_ms,
            Self::LatencyP95 => snapshot.latency_p95_ms,
            Self::LatencyP99 => snapshot.latency_p99_ms,
            Self::ThroughputRps => snapshot.throughput_rps,
            Self::ErrorRatePercent => snapshot.error_rate_percent,
            Self::CacheHitRatePercent => snapshot.cache_hit_rate_percent,
            Self::MemoryUsageMb => snapshot.memory_usage_mb,
            Self::CpuUsagePercent => snapshot.cpu_usage_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    /// Whether `value` violates `threshold` under this comparison
    pub fn violated(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric_name: MetricName,
    pub threshold_value: f64,
    pub comparison: Comparison,
    pub severity: Severity,
}

/// One violated threshold on one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric_name: MetricName,
    pub value: f64,
    pub threshold_value: f64,
    pub comparison: Comparison,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertManager {
    thresholds: Vec<AlertThreshold>,
}

impl AlertManager {
    pub fn new(thresholds: Vec<AlertThreshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[AlertThreshold] {
        &self.thresholds
    }

    /// Evaluate every threshold against `snapshot`
    pub fn check_alerts(&self, snapshot: &PerformanceSnapshot) -> Vec<Alert> {
        self.thresholds
            .iter()
            .filter_map(|threshold| {
                let value = threshold.metric_name.value_in(snapshot);
                if !threshold
                    .comparison
                    .violated(value, threshold.threshold_value)
                {
                    return None;
                }
                Some(Alert {
                    metric_name: threshold.metric_name,
                    value,
                    threshold_value: threshold.threshold_value,
                    comparison: threshold.comparison,
                    severity: threshold.severity,
                    message: format!(
                        "{} is {:.2} ({} {})",
                        threshold.metric_name.as_str(),
                        value,
                        threshold.comparison.symbol(),
                        threshold.threshold_value
                    ),
                    timestamp: snapshot.timestamp,
                })
            })
            .collect()
    }
}
