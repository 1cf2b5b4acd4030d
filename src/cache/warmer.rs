//! Proactive cache population
//!
//! Sends a fixed list of representative prompts through the full gateway
//! pipeline as the `cache-warmer` tenant, so their responses are cached
//! before real traffic asks for them. Warming is best-effort: failures are
//! logged and counted, never returned to callers.

use crate::config::{CacheConfig, WarmPrompt};
use crate::gateway::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_WORKSPACE, Gateway, RouteRequest,
};
use serde::Serialize;
use tokio::task::JoinHandle;

/// Tenant the warmer is rate limited as
pub const WARMER_TENANT: &str = "cache-warmer";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub attempted: usize,
    pub warmed: usize,
    pub already_cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CacheWarmer {
    prompts: Vec<WarmPrompt>,
}

impl CacheWarmer {
    pub fn new(prompts: Vec<WarmPrompt>) -> Self {
        Self { prompts }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.warm_prompts.clone())
    }

    pub fn prompts(&self) -> &[WarmPrompt] {
        &self.prompts
    }

    /// Route every prompt once, in order
    pub async fn warm(&self, gateway: &Gateway) -> WarmReport {
        let mut report = WarmReport::default();

        for warm in &self.prompts {
            report.attempted += 1;
            let request = match RouteRequest::new(
                warm.prompt.clone(),
                warm.task_type,
                WARMER_TENANT,
                DEFAULT_WORKSPACE,
                DEFAULT_MAX_TOKENS,
                DEFAULT_TEMPERATURE,
            ) {
                Ok(request) => request,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, "Skipping invalid warm prompt");
                    continue;
                }
            };

            let result = gateway.route(request).await;
            if !result.success {
                report.failed += 1;
                tracing::warn!(
                    task_type = warm.task_type.as_str(),
                    error_kind = result.error_kind.as_str(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "Cache warm prompt failed"
                );
            } else if result.cache_hit {
                report.already_cached += 1;
            } else {
                report.warmed += 1;
            }
        }

        report
    }

    /// Warm on a background task
    pub fn spawn(self, gateway: Gateway) -> JoinHandle<WarmReport> {
        tokio::spawn(async move {
            let report = self.warm(&gateway).await;
            if report.failed > 0 {
                gateway.metrics().background_task_failure("cache_warmer");
            }
            tracing::info!(
                attempted = report.attempted,
                warmed = report.warmed,
                already_cached = report.already_cached,
                failed = report.failed,
                "Cache warming finished"
            );
            report
        })
    }
}
