//! Exponential backoff with jitter
//!
//! Delay for attempt `n` (0-indexed):
//! `min(max_delay, base_delay * exponential_base^n) * (1 + jitter_factor * r)`
//! where `r` is uniform in `[0, 1)` when jitter is enabled and `0` otherwise.

use crate::config::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
    jitter_factor: f64,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, exponential_base: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            exponential_base,
            jitter: false,
            jitter_factor: 0.0,
        }
    }

    /// Enable jitter with the given factor (clamped to `[0, 1]`)
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter = true;
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.exponential_base,
        );
        if config.jitter {
            backoff.with_jitter(config.jitter_factor)
        } else {
            backoff
        }
    }

    /// Delay before retrying after attempt `attempt` (0-indexed), without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        // powi overflows to inf for large attempts; min() above already caps it
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay for `attempt` with `jitter_sample` in `[0, 1)` applied
    pub fn delay_with_sample(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let base = self.base_delay_for(attempt);
        if !self.jitter {
            return base;
        }
        base.mul_f64(1.0 + self.jitter_factor * jitter_sample.clamp(0.0, 1.0))
    }

    /// Delay for `attempt` with a random jitter sample
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = if self.jitter {
            rand::random::<f64>()
        } else {
            0.0
        };
        self.delay_with_sample(attempt, sample)
    }

    /// Upper bound of any delay this backoff can produce
    pub fn max_possible_delay(&self) -> Duration {
        if self.jitter {
            self.max_delay.mul_f64(1.0 + self.jitter_factor)
        } else {
            self.max_delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 2.0)
    }

    #[test]
    fn test_exponential_growth() {
        let b = backoff();
        assert_eq!(b.base_delay_for(0), Duration::from_millis(100));
        assert_eq!(b.base_delay_for(1), Duration::from_millis(200));
        assert_eq!(b.base_delay_for(2), Duration::from_millis(400));
        assert_eq!(b.base_delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped_at_max() {
        let b = backoff();
        assert_eq!(b.base_delay_for(4), Duration::from_secs(1));
        assert_eq!(b.base_delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_no_jitter_ignores_sample() {
        let b = backoff();
        assert_eq!(b.delay_with_sample(1, 0.9), Duration::from_millis(200));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
    }

    #[test]
    fn test_jitter_scales_delay() {
        let b = backoff().with_jitter(0.5);
        assert_eq!(b.delay_with_sample(1, 0.0), Duration::from_millis(200));
        assert_eq!(b.delay_with_sample(1, 1.0), Duration::from_millis(300));
    }

    #[test]
    fn test_random_jitter_stays_in_bounds() {
        let b = backoff().with_jitter(0.1);
        for _ in 0..100 {
            let d = b.delay_for(2);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(440));
        }
        assert_eq!(b.max_possible_delay(), Duration::from_millis(1100));
    }

    #[test]
    fn test_from_config() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 500,
            exponential_base: 3.0,
            jitter: false,
            jitter_factor: 0.2,
        };
        let b = Backoff::from_config(&config);
        assert_eq!(b.base_delay_for(1), Duration::from_millis(150));
        assert_eq!(b.delay_for(1), Duration::from_millis(150));
    }
}
