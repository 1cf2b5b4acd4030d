//! Error types for routegate
//!
//! `AppError` covers configuration and surface-level failures and implements
//! `IntoResponse` for Axum handlers. `UpstreamError` carries typed outcomes of
//! calls to the upstream provider so every layer can classify a failure
//! without parsing messages.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Caller-visible classification of a route outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[default]
    None,
    /// Caller error. Never retried, never counted by the circuit breaker.
    BadRequest,
    /// Transient upstream or network failure that survived every retry.
    Retryable,
    /// Admission denied locally; the request never reached the network.
    RateLimited,
    /// Circuit open, or a non-retryable upstream failure.
    UpstreamError,
}

impl ErrorKind {
    /// Label used for logs and Prometheus series
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::BadRequest => "bad_request",
            Self::Retryable => "retryable",
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
        }
    }

    /// Whether an outcome of this kind counts as an upstream failure for the
    /// circuit breaker
    pub fn counts_as_upstream_failure(&self) -> bool {
        matches!(self, Self::Retryable | Self::UpstreamError)
    }
}

/// Typed failure of a single upstream exchange
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// Upstream rejected the request as malformed (4xx other than 408/429)
    #[error("Upstream rejected request with status {status}: {message}")]
    BadRequest { status: u16, message: String },

    /// Upstream answered 408, 429 or 5xx
    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    /// Connection-level failure (refused, reset, DNS)
    #[error("Transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// Upstream answered 2xx but the body did not match the expected shape
    #[error("Malformed upstream response: {0}")]
    Decode(String),

    #[error("Batch response contained {got} results for {expected} requests")]
    BatchMismatch { expected: usize, got: usize },

    #[error("No upstream session became available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Request cancelled by caller")]
    Cancelled,

    #[error("Gateway is shutting down")]
    Shutdown,
}

impl UpstreamError {
    /// Returns true if the error is transient and worth retrying
    ///
    /// Retryable: retryable statuses, timeouts, transport errors, pool exhaustion.
    /// Terminal: bad requests, malformed bodies, batch mismatches, closed pool,
    /// cancellation, shutdown.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Status { .. }
                | Self::Timeout { .. }
                | Self::Transport { .. }
                | Self::PoolExhausted { .. }
        )
    }

    /// Caller-visible kind for this error once no further retry will happen
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Cancelled => ErrorKind::Retryable,
            e if e.is_retryable() => ErrorKind::Retryable,
            _ => ErrorKind::UpstreamError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_creates() {
        let err = AppError::Config("test error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_validation_error_creates() {
        let err = AppError::Validation("invalid input".to_string());
        assert_eq!(err.to_string(), "Invalid request: invalid input");
    }

    #[test]
    fn test_validation_error_response_status() {
        let err = AppError::Validation("test".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_response_status() {
        let err = AppError::Internal("test".to_string());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_upstream_status_errors_are_retryable() {
        let err = UpstreamError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::Retryable);
    }

    #[test]
    fn test_upstream_bad_request_is_terminal() {
        let err = UpstreamError::BadRequest {
            status: 400,
            message: "bad prompt".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(!err.kind().counts_as_upstream_failure());
    }

    #[test]
    fn test_decode_error_maps_to_upstream_error() {
        let err = UpstreamError::Decode("missing field `text`".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::UpstreamError);
        assert!(err.kind().counts_as_upstream_failure());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }
}
