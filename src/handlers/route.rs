//! `POST /route`
//!
//! Body fields other than `prompt` are optional and fall back to the request
//! defaults. The JSON `RouteResult` is always returned; the HTTP status
//! mirrors its `error_kind`.

use crate::error::ErrorKind;
use crate::gateway::{
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TENANT, DEFAULT_WORKSPACE, RouteResult,
    TaskType,
};
use crate::handlers::AppState;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RouteBody {
    pub prompt: String,
    #[serde(default)]
    pub task_type: TaskType,
    pub tenant_id: Option<String>,
    pub workspace_id: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

pub async fn handler(
    State(state): State<AppState>,
    Json(body): Json<RouteBody>,
) -> (StatusCode, HeaderMap, Json<RouteResult>) {
    let result = state
        .gateway()
        .route_prompt(
            body.prompt,
            body.task_type,
            body.tenant_id.unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            body.workspace_id.unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
            body.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            body.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        )
        .await;

    let mut headers = HeaderMap::new();
    if let Some(retry_after_ms) = result.retry_after_ms {
        let secs = retry_after_ms.div_ceil(1000).max(1);
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
    }

    (status_for(result.error_kind), headers, Json(result))
}

/// HTTP status for a route outcome
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::None => StatusCode::OK,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Retryable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::UpstreamError => StatusCode::BAD_GATEWAY,
    }
}
