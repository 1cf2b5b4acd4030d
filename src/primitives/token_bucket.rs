//! Token bucket with lazy refill
//!
//! The bucket has no background timer. Every check first credits the tokens
//! accrued since the last refill, capped at capacity, then compares and
//! decrements in the same call. Callers that share a bucket across tasks wrap
//! it in a single lock so the check and the decrement cannot interleave.

use std::time::Duration;
use tokio::time::Instant;

/// A token bucket holding fractional tokens
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self::new_at(capacity, refill_per_sec, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn new_at(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Tokens available at `now` (refills first)
    pub fn available_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Credit tokens accrued since the previous refill
    pub fn refill(&mut self, now: Instant) {
        // A clock reading older than the last refill credits nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Whether `cost` tokens are available at `now` without consuming them
    pub fn can_consume_at(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= cost
    }

    /// Refill, then consume `cost` tokens if available
    pub fn try_consume_at(&mut self, cost: f64, now: Instant) -> bool {
        if self.can_consume_at(cost, now) {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn try_consume(&mut self, cost: f64) -> bool {
        self.try_consume_at(cost, Instant::now())
    }

    /// Time until `cost` tokens will be available, measured from `now`
    ///
    /// Zero if the tokens are already there. A cost above capacity never
    /// passes; it reports the time to refill an empty bucket.
    pub fn time_until_available(&mut self, cost: f64, now: Instant) -> Duration {
        if cost > self.capacity {
            return Duration::from_secs_f64(self.capacity / self.refill_per_sec);
        }
        self.refill(now);
        let missing = cost - self.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }
}
