//! HTTP handlers for the routegate server

use crate::gateway::Gateway;
use crate::metrics::Metrics;
use crate::middleware::request_id::request_id_middleware;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod dashboard;
pub mod health;
pub mod metrics;
pub mod route;

/// Application state shared across all handlers
///
/// Cheap to clone; the gateway shares its components between clones.
#[derive(Clone)]
pub struct AppState {
    gateway: Gateway,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.gateway.metrics()
    }
}

/// Build the server's router with tracing and request id middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/route", post(route::handler))
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/live", get(health::liveness_handler))
        .route("/dashboard", get(dashboard::handler))
        .route("/metrics", get(metrics::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
