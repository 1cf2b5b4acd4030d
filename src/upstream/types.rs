//! Wire types exchanged with the upstream provider

use crate::gateway::{RouteRequest, TaskType};
use serde::{Deserialize, Serialize};

/// Body of `POST {base}/route`, and one element of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub task_type: TaskType,
    pub max_tokens: u32,
    pub temperature: f64,
    pub tenant_id: String,
    pub workspace_id: String,
}

impl CompletionRequest {
    pub fn from_route(request: &RouteRequest, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: request.prompt().to_string(),
            task_type: request.task_type(),
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
            tenant_id: request.tenant_id().to_string(),
            workspace_id: request.workspace_id().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost: f64,
}

/// Body of `POST {base}/route/batch`
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest<'a> {
    pub requests: &'a [CompletionRequest],
}

/// Results come back in request order
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<CompletionResponse>,
}

/// Raw HTTP exchange result returned by the connection pool
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
