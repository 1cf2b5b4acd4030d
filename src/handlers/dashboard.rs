//! `GET /dashboard`: rolling performance snapshot with cache and breaker views

use crate::cache::CacheStats;
use crate::handlers::AppState;
use crate::monitoring::PerformanceDashboard;
use crate::resilience::BreakerSnapshot;
use crate::upstream::PoolStats;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub performance: PerformanceDashboard,
    pub cache: CacheStats,
    pub circuit_breakers: Vec<BreakerSnapshot>,
    pub pool: PoolStats,
    pub tenants: usize,
}

pub async fn handler(State(state): State<AppState>) -> Json<DashboardResponse> {
    let gateway = state.gateway();
    Json(DashboardResponse {
        performance: gateway.dashboard(),
        cache: gateway.cache_stats().await,
        circuit_breakers: gateway.breaker_states(),
        pool: gateway.pool_stats(),
        tenants: gateway.tenant_count(),
    })
}
