//! Sliding-window request counter
//!
//! Keeps the timestamps of admitted requests inside the window. The log never
//! holds more than `limit` entries: once full, further requests are denied
//! until the oldest entry ages out, so memory per counter is bounded.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    window: Duration,
    limit: usize,
    hits: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            hits: VecDeque::with_capacity(limit.min(1024)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Requests counted inside the window ending at `now`
    pub fn count_at(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.hits.len()
    }

    /// Whether one more request fits at `now`
    pub fn can_admit_at(&mut self, now: Instant) -> bool {
        self.count_at(now) < self.limit
    }

    /// Record a request. Callers check `can_admit_at` first.
    pub fn record_at(&mut self, now: Instant) {
        self.evict_expired(now);
        if self.hits.len() < self.limit {
            self.hits.push_back(now);
        }
    }

    /// Check and record in one step
    pub fn try_admit_at(&mut self, now: Instant) -> bool {
        if self.can_admit_at(now) {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until one more request fits, measured from `now`
    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        if self.can_admit_at(now) {
            return Duration::ZERO;
        }
        match self.hits.front() {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}
