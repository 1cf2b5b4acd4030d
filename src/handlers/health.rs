//! Health probe endpoints
//!
//! `/health` pings the upstream and reports every sub-check with breaker and
//! pool state. `/ready` uses local checks only and is cheap enough for a load
//! balancer to poll. `/live` answers as long as the process is serving.

use crate::handlers::AppState;
use crate::monitoring::{DetailedHealth, LivenessReport, ReadinessReport};
use axum::{Json, extract::State, http::StatusCode};

/// 200 unless a critical sub-check failed, then 503
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<DetailedHealth>) {
    let report = state.gateway().health_check().await;
    let status = if report.overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn readiness_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.gateway().readiness();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn liveness_handler(State(state): State<AppState>) -> Json<LivenessReport> {
    Json(state.gateway().liveness())
}
