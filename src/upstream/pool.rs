//! Pooled HTTP sessions to the upstream
//!
//! A fixed number of `reqwest::Client` sessions live in an [`ObjectPool`].
//! Each call checks one out, waiting at most `acquire_timeout_ms`. Connect
//! failures are retried a few times with a short fixed delay before the
//! error surfaces; every other outcome is returned as-is for the retry
//! strategy above to judge.

use crate::config::{PoolConfig, UpstreamConfig};
use crate::error::{AppError, AppResult, UpstreamError};
use crate::primitives::{ObjectPool, PoolError};
use crate::upstream::types::HttpResponse;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters exposed to health and monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate_percent: f64,
    pub pool_size: usize,
    pub available_sessions: usize,
    pub closed: bool,
}

pub struct ConnectionPool {
    sessions: ObjectPool<reqwest::Client>,
    api_key: Option<String>,
    request_timeout: Duration,
    acquire_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(pool: &PoolConfig, upstream: &UpstreamConfig) -> AppResult<Self> {
        let request_timeout = upstream.request_timeout();
        let mut sessions = Vec::with_capacity(pool.pool_size);
        for _ in 0..pool.pool_size {
            let client = reqwest::Client::builder()
                .timeout(request_timeout)
                .pool_max_idle_per_host(1)
                .build()
                .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
            sessions.push(client);
        }

        tracing::debug!(
            pool_size = pool.pool_size,
            upstream = %upstream.name,
            "Connection pool created"
        );

        Ok(Self {
            sessions: ObjectPool::new(sessions),
            api_key: upstream.resolved_api_key(),
            request_timeout,
            acquire_timeout: Duration::from_millis(pool.acquire_timeout_ms),
            max_retries: pool.max_retries,
            retry_delay: Duration::from_millis(pool.retry_delay_ms),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
        })
    }

    /// POST a JSON body
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<HttpResponse, UpstreamError> {
        self.send(url, |client| client.post(url).json(body)).await
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, UpstreamError> {
        self.send(url, |client| client.get(url)).await
    }

    async fn send<F>(&self, url: &str, build: F) -> Result<HttpResponse, UpstreamError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let session = self
            .sessions
            .acquire(self.acquire_timeout)
            .await
            .map_err(|e| match e {
                PoolError::Timeout { waited_ms } => UpstreamError::PoolExhausted { waited_ms },
                PoolError::Closed => UpstreamError::PoolClosed,
            })?;

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0;
        loop {
            let mut request = build(&*session);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.map_err(|e| self.map_error(url, e))?;
                    let response = HttpResponse { status, body };
                    if response.is_success() {
                        self.successful_requests.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(response);
                }
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        url = %url,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Connect error, retrying on pooled session"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(self.map_error(url, e)),
            }
        }
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> UpstreamError {
        if e.is_timeout() {
            UpstreamError::Timeout {
                url: url.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            UpstreamError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let success_rate_percent = if total == 0 {
            100.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        PoolStats {
            total_requests: total,
            successful_requests: successful,
            success_rate_percent,
            pool_size: self.sessions.capacity(),
            available_sessions: self.sessions.available(),
            closed: self.sessions.is_closed(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sessions.is_closed()
    }

    /// Release all idle sessions; later calls fail with `PoolClosed`
    pub fn close(&self) {
        if !self.sessions.is_closed() {
            self.sessions.close();
            tracing::info!("Upstream connection pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> ConnectionPool {
        let config = crate::config::Config::for_upstream("http://127.0.0.1:9");
        let pool_config = PoolConfig {
            pool_size: size,
            ..PoolConfig::default()
        };
        ConnectionPool::new(&pool_config, &config.upstream).expect("pool builds")
    }

    #[test]
    fn test_fresh_pool_stats() {
        let stats = pool(3).stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.pool_size, 3);
        assert_eq!(stats.available_sessions, 3);
        assert_eq!(stats.success_rate_percent, 100.0);
        assert!(!stats.closed);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_calls() {
        let pool = pool(2);
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.stats().available_sessions, 0);

        let err = pool.get("http://127.0.0.1:9/health").await.unwrap_err();
        assert_eq!(err, UpstreamError::PoolClosed);
        assert!(!err.is_retryable());
    }
}
