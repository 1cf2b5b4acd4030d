//! The gateway: one entry point over cache, admission control, dispatch and
//! monitoring
//!
//! A route call runs these stages in order, stopping at the first that
//! produces a result:
//! 1. cache lookup (a hit returns immediately)
//! 2. per-tenant rate limiting
//! 3. circuit breaker admission
//! 4. dispatch through the batcher, connection pool and retry strategy
//!
//! Stage 4 runs on a spawned task that owns the breaker permit. The caller
//! only waits for it, so a caller that goes away (a dropped future, a
//! dropped [`RouteHandle`] or a fired cancellation token) never prevents the
//! breaker, cache and monitor from seeing the real outcome.

use crate::batcher::RequestBatcher;
use crate::cache::{CacheManager, CacheStats, CacheWarmer, CachedCompletion, cache_key};
use crate::config::Config;
use crate::error::{AppError, AppResult, ErrorKind, UpstreamError};
use crate::gateway::request::{RouteRequest, RouteResult, TaskType};
use crate::metrics::{CacheLookup, Metrics};
use crate::monitoring::{
    DetailedHealth, HealthChecker, HealthEndpoint, LivenessReport, PerformanceDashboard,
    PerformanceMonitor, ReadinessReport,
};
use crate::resilience::{
    BreakerPermit, BreakerSnapshot, CircuitBreakerRegistry, RateLimitDecision, RateLimiter,
    RetryError, RetryStrategy,
};
use crate::upstream::{
    CompletionBackend, CompletionRequest, ConnectionPool, PoolStats, UpstreamClient,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Rate limiter cost of a request
///
/// The gateway charges every request through this hook before it reaches
/// the network. The default charges one unit per request.
pub trait AdmissionCost: Send + Sync {
    fn cost(&self, request: &RouteRequest) -> u32;
}

/// One unit per request
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitCost;

impl AdmissionCost for UnitCost {
    fn cost(&self, _request: &RouteRequest) -> u32 {
        1
    }
}

struct GatewayInner {
    config: Config,
    cache: CacheManager,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
    client: UpstreamClient,
    batcher: RequestBatcher,
    monitor: PerformanceMonitor,
    health: HealthEndpoint,
    metrics: Arc<Metrics>,
    admission: Arc<dyn AdmissionCost>,
    shutdown: CancellationToken,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        // Stops the idle tenant sweeper
        self.shutdown.cancel();
    }
}

/// Resilient client for the upstream routing provider
///
/// Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("upstream", &self.inner.client.name())
            .field("batching", &self.inner.batcher.is_enabled())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Gateway {
    /// Build a gateway charging one rate-limit unit per request
    ///
    /// Must be called inside a Tokio runtime: background tasks (batch
    /// worker, tenant sweeper, optional cache warmer) are spawned here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn new(config: Config) -> AppResult<Self> {
        Self::with_admission_cost(config, Arc::new(UnitCost))
    }

    pub fn with_admission_cost(
        config: Config,
        admission: Arc<dyn AdmissionCost>,
    ) -> AppResult<Self> {
        config.validate()?;

        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| AppError::Internal(format!("Failed to create metrics: {}", e)))?,
        );

        let pool = Arc::new(ConnectionPool::new(&config.pool, &config.upstream)?);
        let client = UpstreamClient::new(pool, config.upstream.clone());
        let backend: Arc<dyn CompletionBackend> = Arc::new(client.clone());

        let batcher = RequestBatcher::new(
            config.batching.clone(),
            backend,
            RetryStrategy::from_config(&config.retry),
            Some(metrics.clone()),
        );

        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone());
        let health = HealthEndpoint::new(
            HealthChecker::new(client.clone(), config.models.clone()),
            breakers.clone(),
            client.clone(),
        );
        let monitor =
            PerformanceMonitor::from_config(&config.monitoring).with_metrics(metrics.clone());
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        let shutdown = CancellationToken::new();

        spawn_tenant_sweeper(rate_limiter.clone(), shutdown.clone());

        tracing::info!(
            upstream = %client.name(),
            base_url = %config.upstream.base_url,
            pool_size = config.pool.pool_size,
            batching = config.batching.enable_batching,
            cache = config.cache.enabled,
            "Gateway initialized"
        );

        let warm_on_startup = config.cache.enabled && config.cache.warm_on_startup;
        let gateway = Self {
            inner: Arc::new(GatewayInner {
                cache: CacheManager::new(&config.cache),
                config,
                rate_limiter,
                breakers,
                client,
                batcher,
                monitor,
                health,
                metrics,
                admission,
                shutdown,
            }),
        };

        if warm_on_startup {
            // Best-effort; the warmer logs and counts its own failures
            let _warming = CacheWarmer::from_config(&gateway.inner.config.cache)
                .spawn(gateway.clone());
        }

        Ok(gateway)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Route a request through cache, admission control and dispatch
    ///
    /// Never panics for expected failures; the outcome is carried in the
    /// returned `RouteResult`.
    pub async fn route(&self, request: RouteRequest) -> RouteResult {
        self.route_inner(request, None).await
    }

    /// Build and route a request; invalid input yields `bad_request`
    pub async fn route_prompt(
        &self,
        prompt: impl Into<String>,
        task_type: TaskType,
        tenant_id: impl Into<String>,
        workspace_id: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
    ) -> RouteResult {
        let started = Instant::now();
        match RouteRequest::new(
            prompt,
            task_type,
            tenant_id,
            workspace_id,
            max_tokens,
            temperature,
        ) {
            Ok(request) => self.route(request).await,
            Err(e) => {
                let latency_ms = elapsed_ms(started);
                tracing::debug!(error = %e, "Rejected invalid route request");
                self.observe(ErrorKind::BadRequest, latency_ms, false);
                RouteResult::failure(ErrorKind::BadRequest, e.to_string())
                    .with_latency_ms(latency_ms)
            }
        }
    }

    /// Route with a cancellation signal
    ///
    /// Once `cancel` fires the caller gets a `retryable` "cancelled" result at
    /// once and unbatched retries stop before their next attempt. A request
    /// already coalesced into a batch still completes in the background.
    pub async fn route_with_cancel(
        &self,
        request: RouteRequest,
        cancel: &CancellationToken,
    ) -> RouteResult {
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                RouteResult::failure(ErrorKind::Retryable, "cancelled")
                    .with_latency_ms(elapsed_ms(started))
            }
            result = self.route_inner(request, Some(cancel.clone())) => result,
        }
    }

    /// Run the route pipeline on a spawned task
    ///
    /// Dropping the handle detaches the task; it still runs to completion and
    /// records its outcome.
    pub fn route_async(&self, request: RouteRequest) -> RouteHandle {
        let gateway = self.clone();
        RouteHandle {
            task: tokio::spawn(async move { gateway.route(request).await }),
        }
    }

    async fn route_inner(
        &self,
        request: RouteRequest,
        cancel: Option<CancellationToken>,
    ) -> RouteResult {
        let started = Instant::now();
        let inner = &self.inner;

        if self.is_shut_down() {
            return RouteResult::failure(
                ErrorKind::UpstreamError,
                UpstreamError::Shutdown.to_string(),
            );
        }

        let model = inner.config.models.model_for(request.task_type()).to_string();
        let key = cache_key(request.prompt(), request.task_type(), &model);

        match inner.cache.get(&key).await {
            Ok(Some(cached)) => {
                inner.metrics.cache_lookup(CacheLookup::Hit);
                let latency_ms = elapsed_ms(started);
                // A hit spends no tokens and costs nothing
                inner
                    .monitor
                    .record_request_metrics(latency_ms, 0, 0.0, true, true);
                self.observe(ErrorKind::None, latency_ms, true);
                tracing::debug!(
                    tenant_id = %request.tenant_id(),
                    task_type = request.task_type().as_str(),
                    "Cache hit"
                );
                return RouteResult::success(cached.text, cached.tokens_used, cached.cost)
                    .with_model(cached.model)
                    .with_cache_hit()
                    .with_latency_ms(latency_ms);
            }
            Ok(None) => {
                if inner.cache.is_enabled() {
                    inner.metrics.cache_lookup(CacheLookup::Miss);
                }
            }
            Err(e) => {
                inner.metrics.cache_lookup(CacheLookup::Error);
                tracing::warn!(error = %e, "Cache lookup failed, dispatching upstream");
            }
        }

        let cost = inner.admission.cost(&request);
        let decision = inner.rate_limiter.allow(request.tenant_id(), cost);
        if let RateLimitDecision::Denied { .. } = decision {
            let retry_after_ms = decision.retry_after_ms();
            inner.metrics.rate_limited();
            let latency_ms = elapsed_ms(started);
            self.observe(ErrorKind::RateLimited, latency_ms, false);
            tracing::debug!(
                tenant_id = %request.tenant_id(),
                cost,
                retry_after_ms,
                "Rate limit denied request"
            );
            return RouteResult::rate_limited(retry_after_ms).with_latency_ms(latency_ms);
        }

        let breaker = inner.breakers.get(inner.client.name());
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                inner.metrics.circuit_rejected(&open.upstream);
                let latency_ms = elapsed_ms(started);
                self.observe(ErrorKind::UpstreamError, latency_ms, false);
                return RouteResult::failure(ErrorKind::UpstreamError, open.to_string())
                    .with_retry_after_ms(duration_ms(open.retry_after))
                    .with_model(model)
                    .with_latency_ms(latency_ms);
            }
        };

        let completion = CompletionRequest::from_route(&request, model);
        let gateway = self.clone();
        let dispatch = tokio::spawn(async move {
            gateway
                .dispatch(completion, permit, key, started, cancel)
                .await
        });

        match dispatch.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Route dispatch task failed");
                RouteResult::failure(ErrorKind::UpstreamError, "route dispatch task failed")
                    .with_latency_ms(elapsed_ms(started))
            }
        }
    }

    async fn dispatch(
        &self,
        request: CompletionRequest,
        permit: BreakerPermit,
        key: String,
        started: Instant,
        cancel: Option<CancellationToken>,
    ) -> RouteResult {
        let inner = &self.inner;
        let model = request.model.clone();
        let outcome = inner
            .batcher
            .add_request_with_cancel(request, cancel.as_ref())
            .await;
        let latency_ms = elapsed_ms(started);

        let result = match outcome {
            Ok(response) => {
                permit.success();
                let cached = CachedCompletion {
                    text: response.text.clone(),
                    tokens_used: response.tokens_used,
                    cost: response.cost,
                    model: model.clone(),
                };
                if let Err(e) = inner.cache.set(&key, &cached, inner.cache.default_ttl()).await {
                    tracing::warn!(error = %e, "Failed to cache completion");
                }
                inner.monitor.record_request_metrics(
                    latency_ms,
                    response.tokens_used,
                    response.cost,
                    true,
                    false,
                );
                RouteResult::success(response.text, response.tokens_used, response.cost)
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                permit.release();
                tracing::debug!(attempts, "Route cancelled by caller");
                RouteResult::failure(ErrorKind::Retryable, "cancelled")
            }
            Err(error) => {
                let kind = error
                    .last_error()
                    .map(UpstreamError::kind)
                    .unwrap_or(ErrorKind::UpstreamError);
                let local = matches!(
                    error.last_error(),
                    Some(UpstreamError::Shutdown | UpstreamError::PoolClosed)
                );
                if kind.counts_as_upstream_failure() && !local {
                    permit.failure();
                } else {
                    permit.release();
                }
                inner
                    .monitor
                    .record_request_metrics(latency_ms, 0, 0.0, false, false);
                tracing::warn!(
                    error_kind = kind.as_str(),
                    attempts = error.attempts(),
                    error = %error,
                    "Route failed"
                );
                RouteResult::failure(kind, error.to_string())
            }
        };

        self.observe(result.error_kind, latency_ms, false);
        result.with_model(model).with_latency_ms(latency_ms)
    }

    fn observe(&self, kind: ErrorKind, latency_ms: f64, cache_hit: bool) {
        if let Err(e) = self.inner.metrics.record_route(kind, latency_ms, cache_hit) {
            tracing::debug!(error = %e, "Failed to record route metrics");
        }
    }

    /// Detailed health: sub-checks (including an upstream ping), breakers, pool
    pub async fn health_check(&self) -> DetailedHealth {
        self.inner.health.health_check().await
    }

    pub fn readiness(&self) -> ReadinessReport {
        self.inner.health.readiness_check()
    }

    pub fn liveness(&self) -> LivenessReport {
        self.inner.health.liveness_check()
    }

    pub fn dashboard(&self) -> PerformanceDashboard {
        self.inner.monitor.get_performance_dashboard()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.client.pool_stats()
    }

    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.inner.breakers.snapshots()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Tenants currently tracked by the rate limiter
    pub fn tenant_count(&self) -> usize {
        self.inner.rate_limiter.tenant_count()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop accepting requests, flush pending batches and close the pool
    ///
    /// Idempotent. Routes started afterwards fail with `upstream_error`.
    pub async fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        self.inner.shutdown.cancel();
        tracing::info!(upstream = %self.inner.client.name(), "Gateway shutting down");

        self.inner.batcher.shutdown().await;
        self.inner.client.close();
        tracing::info!("Gateway shut down");
    }
}

/// Handle to a route running on a spawned task
///
/// Await it for the result. Dropping it detaches the task without
/// cancelling it.
#[must_use = "await the handle for the route result, or drop it to detach"]
pub struct RouteHandle {
    task: JoinHandle<RouteResult>,
}

impl RouteHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for RouteHandle {
    type Output = RouteResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Route task failed");
                RouteResult::failure(ErrorKind::UpstreamError, "route task failed")
            })
        })
    }
}

/// Periodically drop rate limiter state for idle tenants until `shutdown`
fn spawn_tenant_sweeper(limiter: RateLimiter, shutdown: CancellationToken) {
    let period = (limiter.config().tenant_idle_ttl() / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = limiter.purge_idle();
                    if evicted > 0 {
                        tracing::info!(evicted, "Evicted idle rate limiter tenants");
                    }
                }
            }
        }
    });
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_nanos().div_ceil(1_000_000) as u64
}
