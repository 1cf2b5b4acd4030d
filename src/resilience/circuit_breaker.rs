//! Circuit breaker for the upstream provider
//!
//! Three states:
//! - **Closed**: requests pass; consecutive failures are counted and any
//!   success resets the count. Reaching `failure_threshold` opens the circuit.
//! - **Open**: requests are rejected without a network call until
//!   `recovery_timeout` has passed since the circuit opened.
//! - **HalfOpen**: one trial request at a time. `success_threshold`
//!   consecutive successes close the circuit; any failure reopens it. Only
//!   trial outcomes count; permits issued while Closed that finish now are
//!   ignored.
//!
//! Callers either wrap an operation with [`CircuitBreaker::execute`] /
//! [`CircuitBreaker::execute_blocking`], or take a [`BreakerPermit`] with
//! [`CircuitBreaker::try_acquire`] and report the outcome on it later.

use crate::config::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Rejection issued while the circuit is open
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Circuit '{upstream}' is open; retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpen {
    pub upstream: String,
    /// Time left before a trial request will be admitted
    pub retry_after: Duration,
}

/// Error returned by [`CircuitBreaker::execute`]
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error(transparent)]
    Open(CircuitOpen),

    #[error("operation failed: {0}")]
    Failed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Read-only view of a breaker for health reports
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub upstream: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    /// When the circuit last opened; cleared once it closes
    pub opened_at: Option<DateTime<Utc>>,
}

/// Per-upstream circuit breaker
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    upstream: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("upstream", &self.upstream)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(upstream: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let upstream: String = upstream.into();
        Self {
            upstream: Arc::from(upstream),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                opened_at_wall: None,
                trial_in_flight: false,
            })),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state; an Open circuit past its recovery timeout reports HalfOpen
    pub fn state(&self) -> CircuitState {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        state.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        BreakerSnapshot {
            upstream: self.upstream.to_string(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_ms: self.config.recovery_timeout_ms,
            opened_at: state.opened_at_wall,
        }
    }

    /// Move Open to HalfOpen once the recovery timeout has elapsed
    fn advance(&self, state: &mut BreakerState, now: Instant) {
        if state.state != CircuitState::Open {
            return;
        }
        let opened_at = state.opened_at.unwrap_or(now);
        if now.saturating_duration_since(opened_at) >= self.config.recovery_timeout() {
            state.state = CircuitState::HalfOpen;
            state.consecutive_successes = 0;
            state.trial_in_flight = false;
            tracing::info!(
                upstream = %self.upstream,
                "Circuit breaker half-open, admitting a trial request"
            );
        }
    }

    fn open(&self, state: &mut BreakerState, now: Instant) {
        state.state = CircuitState::Open;
        state.opened_at = Some(now);
        state.opened_at_wall = Some(Utc::now());
        state.consecutive_successes = 0;
        state.trial_in_flight = false;
    }

    /// Ask for admission of one request
    ///
    /// Closed always admits. HalfOpen admits only when no trial is in flight.
    /// Open rejects with the remaining time before recovery.
    pub fn try_acquire(&self) -> Result<BreakerPermit, CircuitOpen> {
        let now = Instant::now();
        let mut state = self.lock();
        self.advance(&mut state, now);

        match state.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self.clone(), false)),
            CircuitState::HalfOpen if !state.trial_in_flight => {
                state.trial_in_flight = true;
                Ok(BreakerPermit::new(self.clone(), true))
            }
            CircuitState::HalfOpen => Err(CircuitOpen {
                upstream: self.upstream.to_string(),
                // A trial is running; its outcome decides, so no fixed wait applies
                retry_after: Duration::ZERO,
            }),
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                let retry_after = self.config.recovery_timeout().saturating_sub(elapsed);
                tracing::debug!(
                    upstream = %self.upstream,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit breaker rejected request (open)"
                );
                Err(CircuitOpen {
                    upstream: self.upstream.to_string(),
                    retry_after,
                })
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    state.opened_at = None;
                    state.opened_at_wall = None;
                    tracing::info!(
                        upstream = %self.upstream,
                        "Circuit breaker closed, upstream recovered"
                    );
                } else {
                    tracing::debug!(
                        upstream = %self.upstream,
                        consecutive_successes = state.consecutive_successes,
                        success_threshold = self.config.success_threshold,
                        "Half-open trial succeeded"
                    );
                }
            }
            // Stragglers admitted while Closed decide nothing once it has opened
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut state = self.lock();
        if trial {
            state.trial_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut state, now);
                    tracing::warn!(
                        upstream = %self.upstream,
                        consecutive_failures = state.consecutive_failures,
                        recovery_timeout_ms = self.config.recovery_timeout_ms,
                        "Circuit breaker opened after consecutive failures"
                    );
                } else {
                    tracing::debug!(
                        upstream = %self.upstream,
                        consecutive_failures = state.consecutive_failures,
                        "Upstream failure recorded (circuit still closed)"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                state.consecutive_failures += 1;
                self.open(&mut state, now);
                tracing::warn!(
                    upstream = %self.upstream,
                    "Half-open trial failed, circuit breaker reopened"
                );
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_release(&self, trial: bool) {
        if trial {
            self.lock().trial_in_flight = false;
        }
    }

    /// Run an async operation under the breaker; every `Err` counts as a failure
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(op, |_| true).await
    }

    /// Run an async operation; `counts_as_failure` decides which errors trip
    /// the breaker. Errors it rejects release the permit without recording.
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        op: F,
        counts_as_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.try_acquire().map_err(CircuitBreakerError::Open)?;
        let result = op().await;
        Self::settle(permit, &result, counts_as_failure);
        result.map_err(CircuitBreakerError::Failed)
    }

    /// Synchronous counterpart of [`execute`](Self::execute)
    pub fn execute_blocking<F, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire().map_err(CircuitBreakerError::Open)?;
        let result = op();
        Self::settle(permit, &result, |_| true);
        result.map_err(CircuitBreakerError::Failed)
    }

    fn settle<T, E, C>(permit: BreakerPermit, result: &Result<T, E>, counts_as_failure: C)
    where
        C: FnOnce(&E) -> bool,
    {
        match result {
            Ok(_) => permit.success(),
            Err(e) if counts_as_failure(e) => permit.failure(),
            Err(_) => permit.release(),
        }
    }

    /// Force the breaker back to Closed
    pub fn reset(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.opened_at = None;
        state.opened_at_wall = None;
        state.trial_in_flight = false;
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
///
/// Report the outcome with `success`, `failure` or `release`. Dropping the
/// permit without reporting behaves like `release`: a HalfOpen trial slot is
/// freed and nothing is recorded.
#[must_use = "report the outcome on the permit"]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this permit is the HalfOpen trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Give the permit back without recording an outcome
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.trial);
        }
    }
}

/// Breakers keyed by upstream name, created on first use
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Breaker for `upstream`, creating it Closed if unseen
    pub fn get(&self, upstream: &str) -> CircuitBreaker {
        self.lock()
            .entry(upstream.to_string())
            .or_insert_with(|| CircuitBreaker::new(upstream, self.config.clone()))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> = self.lock().values().cloned().collect();
        let mut snapshots: Vec<BreakerSnapshot> =
            breakers.iter().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.upstream.cmp(&b.upstream));
        snapshots
    }
}
