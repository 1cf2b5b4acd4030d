//! Per-tenant rate limiting
//!
//! Each tenant gets a token bucket for burst control plus sliding windows for
//! per-minute, per-hour and per-day quotas. A request passes only if every
//! limit admits it, and a denied request consumes nothing. State is created on
//! a tenant's first request and evicted when idle past the TTL or when the
//! tenant table is full (least recently seen first).

use crate::config::RateLimitConfig;
use crate::primitives::{SlidingWindowCounter, TokenBucket};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Suggested wait in milliseconds, rounded up; zero when allowed
    pub fn retry_after_ms(&self) -> u64 {
        match self {
            Self::Allowed => 0,
            Self::Denied { retry_after } => {
                let nanos = retry_after.as_nanos();
                nanos.div_ceil(1_000_000) as u64
            }
        }
    }
}

#[derive(Debug)]
struct TenantState {
    bucket: TokenBucket,
    windows: [SlidingWindowCounter; 3],
    last_seen: Instant,
}

impl TenantState {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new_at(
                config.burst_capacity as f64,
                config.refill_rate(),
                now,
            ),
            windows: [
                SlidingWindowCounter::new(
                    config.requests_per_minute as usize,
                    Duration::from_secs(60),
                ),
                SlidingWindowCounter::new(
                    config.requests_per_hour as usize,
                    Duration::from_secs(3_600),
                ),
                SlidingWindowCounter::new(
                    config.requests_per_day as usize,
                    Duration::from_secs(86_400),
                ),
            ],
            last_seen: now,
        }
    }

    fn check_and_consume(&mut self, cost: f64, now: Instant) -> RateLimitDecision {
        self.last_seen = now;

        let mut retry_after = Duration::ZERO;
        let mut denied = false;

        if !self.bucket.can_consume_at(cost, now) {
            denied = true;
            retry_after = retry_after.max(self.bucket.time_until_available(cost, now));
        }
        for window in &mut self.windows {
            if !window.can_admit_at(now) {
                denied = true;
                retry_after = retry_after.max(window.time_until_available(now));
            }
        }

        if denied {
            return RateLimitDecision::Denied { retry_after };
        }

        // Every limit admitted under the same lock, so the decrement cannot race
        self.bucket.try_consume_at(cost, now);
        for window in &mut self.windows {
            window.record_at(now);
        }
        RateLimitDecision::Allowed
    }
}

/// Tenant-keyed rate limiter
///
/// Cheap to clone; clones share state. Each tenant has its own lock, and the
/// tenant table lock is held only to look up or insert a tenant.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    tenants: Arc<Mutex<HashMap<String, Arc<Mutex<TenantState>>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            tenants: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check whether `tenant_id` may spend `cost` units now
    ///
    /// Never blocks on time; a denial carries the wait until every failing
    /// limit would admit the request.
    pub fn allow(&self, tenant_id: &str, cost: u32) -> RateLimitDecision {
        self.allow_at(tenant_id, cost, Instant::now())
    }

    pub fn allow_at(&self, tenant_id: &str, cost: u32, now: Instant) -> RateLimitDecision {
        let tenant = self.tenant_state(tenant_id, now);
        let decision = lock(&tenant).check_and_consume(cost as f64, now);

        match decision {
            RateLimitDecision::Allowed => {
                tracing::debug!(tenant_id = %tenant_id, cost, "Request admitted by rate limiter");
            }
            RateLimitDecision::Denied { retry_after } => {
                if cost as f64 > self.config.burst_capacity as f64 {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        cost,
                        burst_capacity = self.config.burst_capacity,
                        "Request cost exceeds burst capacity and can never be admitted"
                    );
                }
                tracing::debug!(
                    tenant_id = %tenant_id,
                    cost,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Request denied by rate limiter"
                );
            }
        }
        decision
    }

    fn tenant_state(&self, tenant_id: &str, now: Instant) -> Arc<Mutex<TenantState>> {
        let mut tenants = lock(&self.tenants);
        if let Some(state) = tenants.get(tenant_id) {
            return Arc::clone(state);
        }

        if tenants.len() >= self.config.max_tenants {
            self.evict(&mut tenants, now);
        }

        let state = Arc::new(Mutex::new(TenantState::new(&self.config, now)));
        tenants.insert(tenant_id.to_string(), Arc::clone(&state));
        state
    }

    /// Drop idle tenants; if none are idle, drop the least recently seen one
    fn evict(&self, tenants: &mut HashMap<String, Arc<Mutex<TenantState>>>, now: Instant) {
        let ttl = self.config.tenant_idle_ttl();
        let before = tenants.len();
        tenants.retain(|_, state| now.saturating_duration_since(lock(state).last_seen) < ttl);

        if tenants.len() >= self.config.max_tenants {
            let oldest = tenants
                .iter()
                .min_by_key(|(_, state)| lock(state).last_seen)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                tenants.remove(&id);
            }
        }

        tracing::debug!(
            evicted = before - tenants.len(),
            remaining = tenants.len(),
            "Evicted rate limiter tenant state"
        );
    }

    /// Remove idle tenants regardless of table size
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let ttl = self.config.tenant_idle_ttl();
        let mut tenants = lock(&self.tenants);
        let before = tenants.len();
        tenants.retain(|_, state| now.saturating_duration_since(lock(state).last_seen) < ttl);
        before - tenants.len()
    }

    /// Forget a tenant's usage
    pub fn reset(&self, tenant_id: &str) {
        lock(&self.tenants).remove(tenant_id);
    }

    pub fn tenant_count(&self) -> usize {
        lock(&self.tenants).len()
    }

    /// Tokens currently in a tenant's bucket, `None` for an unknown tenant
    pub fn available_tokens(&self, tenant_id: &str) -> Option<f64> {
        let state = lock(&self.tenants).get(tenant_id).cloned()?;
        let available = lock(&state).bucket.available_at(Instant::now());
        Some(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill: f64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: 1_000,
            requests_per_hour: 10_000,
            requests_per_day: 100_000,
            burst_capacity: capacity,
            refill_per_second: Some(refill),
            max_tenants: 100,
            tenant_idle_ttl_secs: 3_600,
        }
    }

    #[test]
    fn test_burst_capacity_then_denial_with_retry_after() {
        let limiter = RateLimiter::new(config(5, 1.0));
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.allow_at("tenant-a", 1, now).is_allowed());
        }
        let denied = limiter.allow_at("tenant-a", 1, now);
        assert!(!denied.is_allowed());
        assert_eq!(denied.retry_after_ms(), 1_000);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let limiter = RateLimiter::new(config(1, 1.0));
        let now = Instant::now();

        assert!(limiter.allow_at("a", 1, now).is_allowed());
        assert!(!limiter.allow_at("a", 1, now).is_allowed());
        assert!(limiter.allow_at("b", 1, now).is_allowed());
        assert_eq!(limiter.tenant_count(), 2);
    }

    #[test]
    fn test_refill_admits_after_wait() {
        let limiter = RateLimiter::new(config(2, 2.0));
        let now = Instant::now();
        assert!(limiter.allow_at("t", 2, now).is_allowed());
        assert!(!limiter.allow_at("t", 1, now).is_allowed());

        let later = now + Duration::from_millis(500);
        assert!(limiter.allow_at("t", 1, later).is_allowed());
        assert!(!limiter.allow_at("t", 1, later).is_allowed());
    }

    #[test]
    fn test_minute_window_caps_requests_independently_of_bucket() {
        let mut cfg = config(100, 100.0);
        cfg.requests_per_minute = 3;
        let limiter = RateLimiter::new(cfg);
        let now = Instant::now();

        for i in 0..3 {
            assert!(limiter.allow_at("t", 1, now + Duration::from_secs(i)).is_allowed());
        }
        let denied = limiter.allow_at("t", 1, now + Duration::from_secs(10));
        assert!(!denied.is_allowed());
        // Oldest hit ages out at t=60s
        assert_eq!(denied.retry_after_ms(), 50_000);

        assert!(limiter.allow_at("t", 1, now + Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let mut cfg = config(1, 1.0);
        cfg.requests_per_minute = 1;
        let limiter = RateLimiter::new(cfg);
        let now = Instant::now();

        // Bucket empty after first, window full after first
        assert!(limiter.allow_at("t", 1, now).is_allowed());
        assert!(!limiter.allow_at("t", 1, now + Duration::from_secs(1)).is_allowed());

        // After a minute both limits admit again
        assert!(limiter.allow_at("t", 1, now + Duration::from_secs(60)).is_allowed());
    }

    #[test]
    fn test_cost_above_capacity_is_always_denied() {
        let limiter = RateLimiter::new(config(3, 1.0));
        let now = Instant::now();
        let decision = limiter.allow_at("t", 4, now);
        assert!(!decision.is_allowed());
        // Full bucket, yet the reported wait is a complete refill
        assert_eq!(decision.retry_after_ms(), 3_000);
        assert_eq!(limiter.available_tokens("t"), Some(3.0));
    }

    #[test]
    fn test_reset_restores_full_bucket() {
        let limiter = RateLimiter::new(config(1, 0.001));
        assert!(limiter.allow("t", 1).is_allowed());
        assert!(!limiter.allow("t", 1).is_allowed());
        limiter.reset("t");
        assert!(limiter.allow("t", 1).is_allowed());
    }

    #[test]
    fn test_tenant_table_is_bounded() {
        let mut cfg = config(5, 1.0);
        cfg.max_tenants = 3;
        let limiter = RateLimiter::new(cfg);
        let now = Instant::now();

        for i in 0..10 {
            limiter.allow_at(&format!("tenant-{i}"), 1, now + Duration::from_millis(i));
        }
        assert_eq!(limiter.tenant_count(), 3);
        assert!(limiter.available_tokens("tenant-9").is_some());
        assert!(limiter.available_tokens("tenant-0").is_none());
    }

    #[test]
    fn test_purge_idle_removes_stale_tenants() {
        let mut cfg = config(5, 1.0);
        cfg.tenant_idle_ttl_secs = 10;
        let limiter = RateLimiter::new(cfg);
        let now = Instant::now();

        limiter.allow_at("old", 1, now);
        limiter.allow_at("fresh", 1, now + Duration::from_secs(9));

        assert_eq!(limiter.purge_idle_at(now + Duration::from_secs(11)), 1);
        assert_eq!(limiter.tenant_count(), 1);
    }

    #[test]
    fn test_concurrent_checks_never_overspend() {
        let limiter = RateLimiter::new(config(50, 0.000_001));
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..20 {
                        if limiter.allow("shared", 1).is_allowed() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 50);
    }
}
