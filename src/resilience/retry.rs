//! Operation-level retry with exponential backoff
//!
//! Wraps an async operation, retrying errors the caller classifies as
//! retryable. A permanently failing retryable operation runs at most
//! `max_retries + 1` times. Non-retryable errors return after the first
//! attempt without sleeping. An optional cancellation token is checked
//! before every attempt and while waiting between attempts.

use crate::config::RetryConfig;
use crate::primitives::Backoff;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One failed attempt, kept for the final error and metrics
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Delay slept after this attempt (zero for the last one)
    pub delay: Duration,
    pub error: String,
}

#[derive(Debug, Clone, Error)]
pub enum RetryError<E> {
    #[error("non-retryable error after {attempts} attempt(s): {error}")]
    NonRetryable { error: E, attempts: u32 },

    #[error("retries exhausted after {attempts} attempt(s): {error}")]
    Exhausted {
        error: E,
        attempts: u32,
        history: Vec<RetryAttempt>,
    },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { last_error: Option<E>, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::NonRetryable { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The last error seen, if any attempt ran
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::NonRetryable { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::NonRetryable { error, .. } | Self::Exhausted { error, .. } => Some(error),
            Self::Cancelled { last_error, .. } => last_error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
    backoff: Backoff,
}

impl RetryStrategy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Backoff::from_config(config))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `op` until it succeeds, fails with an error `classify` rejects,
    /// exhausts its retries, or `cancel` fires
    pub async fn execute_with_retry<F, Fut, T, E, C>(
        &self,
        mut op: F,
        classify: C,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let mut history = Vec::new();
        let mut last_error: Option<E> = None;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RetryError::Cancelled {
                    last_error,
                    attempts: attempt,
                });
            }

            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            attempt += 1;

            if !classify(&error) {
                tracing::debug!(attempts = attempt, error = %error, "Non-retryable error");
                return Err(RetryError::NonRetryable {
                    error,
                    attempts: attempt,
                });
            }

            if attempt > self.max_retries {
                history.push(RetryAttempt {
                    attempt_number: attempt,
                    delay: Duration::ZERO,
                    error: error.to_string(),
                });
                tracing::warn!(
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    error,
                    attempts: attempt,
                    history,
                });
            }

            let delay = self.backoff.delay_for(attempt - 1);
            tracing::warn!(
                attempt = attempt,
                max_attempts = self.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable error, backing off"
            );
            history.push(RetryAttempt {
                attempt_number: attempt,
                delay,
                error: error.to_string(),
            });
            last_error = Some(error);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(RetryError::Cancelled {
                                last_error,
                                attempts: attempt,
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
