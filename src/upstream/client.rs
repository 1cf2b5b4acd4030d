//! Typed calls to the upstream routing provider
//!
//! Turns raw HTTP exchanges from the [`ConnectionPool`] into typed results:
//! 2xx bodies are parsed, 408/429/5xx become retryable `Status` errors and
//! other 4xx become terminal `BadRequest` errors.

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::upstream::pool::{ConnectionPool, PoolStats};
use crate::upstream::types::{
    BatchRequest, BatchResponse, CompletionRequest, CompletionResponse, HttpResponse,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest slice of an error body kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    pool: Arc<ConnectionPool>,
    config: Arc<UpstreamConfig>,
}

impl UpstreamClient {
    pub fn new(pool: Arc<ConnectionPool>, config: UpstreamConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn close(&self) {
        self.pool.close();
    }

    /// Send one completion request
    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        let url = self.config.route_url();
        let response = self.pool.post(&url, request).await?;
        tracing::debug!(
            upstream = %self.config.name,
            status = response.status,
            model = %request.model,
            "Upstream completion returned"
        );
        parse_body(check_status(response)?)
    }

    /// Send a batch; results are returned in request order
    pub async fn complete_batch(
        &self,
        requests: &[CompletionRequest],
    ) -> Result<Vec<CompletionResponse>, UpstreamError> {
        let url = self.config.batch_url();
        let response = self.pool.post(&url, &BatchRequest { requests }).await?;
        tracing::debug!(
            upstream = %self.config.name,
            status = response.status,
            batch_size = requests.len(),
            "Upstream batch returned"
        );

        let batch: BatchResponse = parse_body(check_status(response)?)?;
        if batch.results.len() != requests.len() {
            return Err(UpstreamError::BatchMismatch {
                expected: requests.len(),
                got: batch.results.len(),
            });
        }
        Ok(batch.results)
    }

    /// Cheap round trip to the health URL; returns the observed latency
    pub async fn ping(&self) -> Result<Duration, UpstreamError> {
        let started = Instant::now();
        let response = self.pool.get(&self.config.health_url()).await?;
        check_status(response)?;
        Ok(started.elapsed())
    }
}

/// Something that can answer completion requests
///
/// Implemented by [`UpstreamClient`]; the batcher and facade only see this
/// trait, so dispatch can be exercised without a network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError>;

    /// Results must come back in request order, one per request
    async fn complete_batch(
        &self,
        requests: &[CompletionRequest],
    ) -> Result<Vec<CompletionResponse>, UpstreamError>;
}

#[async_trait]
impl CompletionBackend for UpstreamClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        UpstreamClient::complete(self, request).await
    }

    async fn complete_batch(
        &self,
        requests: &[CompletionRequest],
    ) -> Result<Vec<CompletionResponse>, UpstreamError> {
        UpstreamClient::complete_batch(self, requests).await
    }
}

/// Map a non-2xx status to its typed error
pub fn check_status(response: HttpResponse) -> Result<HttpResponse, UpstreamError> {
    if response.is_success() {
        return Ok(response);
    }

    let message = truncate(&response.body);
    match response.status {
        408 | 429 | 500..=599 => Err(UpstreamError::Status {
            status: response.status,
            message,
        }),
        400..=499 => Err(UpstreamError::BadRequest {
            status: response.status,
            message,
        }),
        status => Err(UpstreamError::Status { status, message }),
    }
}

fn parse_body<T: DeserializeOwned>(response: HttpResponse) -> Result<T, UpstreamError> {
    serde_json::from_str(&response.body).map_err(|e| UpstreamError::Decode(e.to_string()))
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_success_passes_through() {
        assert!(check_status(response(200, "{}")).is_ok());
        assert!(check_status(response(204, "")).is_ok());
    }

    #[test]
    fn test_client_errors_are_terminal() {
        let err = check_status(response(400, "bad prompt")).unwrap_err();
        assert_eq!(
            err,
            UpstreamError::BadRequest {
                status: 400,
                message: "bad prompt".to_string()
            }
        );
        assert!(!err.is_retryable());
        assert!(!check_status(response(404, "")).unwrap_err().is_retryable());
    }

    #[test]
    fn test_timeout_and_throttle_statuses_are_retryable() {
        assert!(check_status(response(408, "")).unwrap_err().is_retryable());
        assert!(check_status(response(429, "")).unwrap_err().is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for status in [500, 502, 503, 504] {
            assert!(check_status(response(status, "")).unwrap_err().is_retryable());
        }
    }

    #[test]
    fn test_long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS * 2);
        match check_status(response(500, &body)).unwrap_err() {
            UpstreamError::Status { message, .. } => {
                assert_eq!(message.chars().count(), MAX_ERROR_BODY_CHARS + 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let err = parse_body::<CompletionResponse>(response(200, "not json")).unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
        assert!(!err.is_retryable());
    }
}
