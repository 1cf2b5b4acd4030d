//! Health probes, rolling performance snapshots and threshold alerts

pub mod alerts;
pub mod health;
pub mod performance;

pub use alerts::{Alert, AlertManager, AlertThreshold, Comparison, MetricName, Severity};
pub use health::{
    CheckResult, DetailedHealth, HealthChecker, HealthEndpoint, HealthReport, HealthStatus,
    LivenessReport, ReadinessReport,
};
pub use performance::{PerformanceDashboard, PerformanceMonitor, PerformanceSnapshot, Totals};
