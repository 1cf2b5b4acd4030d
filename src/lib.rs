//! routegate - resilient gateway client for a model-routing provider
//!
//! Turns an unreliable, rate-limited remote completion call into a
//! predictable operation: responses are cached, tenants are rate limited,
//! a circuit breaker guards the upstream, calls are retried with backoff
//! and optionally coalesced into batches, and every outcome feeds health
//! and performance monitoring. [`gateway::Gateway`] is the entry point.

pub mod batcher;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod monitoring;
pub mod primitives;
pub mod resilience;
pub mod telemetry;
pub mod upstream;
