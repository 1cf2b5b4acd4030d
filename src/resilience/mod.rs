//! Admission control and failure handling around upstream calls

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitOpen, CircuitState,
};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use retry::{RetryAttempt, RetryError, RetryStrategy};
