//! Caller-facing request and result types

use crate::error::{AppError, AppResult, ErrorKind};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum allowed prompt length in characters
pub const MAX_PROMPT_LENGTH: usize = 100_000;

pub const DEFAULT_TENANT: &str = "default";
pub const DEFAULT_WORKSPACE: &str = "default";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Task type tag used to pick a model; opaque to the gateway otherwise
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CasualChat,
    Code,
    CreativeWriting,
    DeepAnalysis,
    DocumentSummary,
    #[default]
    QuestionAnswer,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CasualChat => "casual_chat",
            Self::Code => "code",
            Self::CreativeWriting => "creative_writing",
            Self::DeepAnalysis => "deep_analysis",
            Self::DocumentSummary => "document_summary",
            Self::QuestionAnswer => "question_answer",
        }
    }
}

/// A validated route request
///
/// Fields are private; instances only come from [`RouteRequest::new`] or
/// deserialization, both of which validate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRequest {
    prompt: String,
    task_type: TaskType,
    tenant_id: String,
    workspace_id: String,
    max_tokens: u32,
    temperature: f64,
}

impl RouteRequest {
    pub fn new(
        prompt: impl Into<String>,
        task_type: TaskType,
        tenant_id: impl Into<String>,
        workspace_id: impl Into<String>,
        max_tokens: u32,
        temperature: f64,
    ) -> AppResult<Self> {
        let prompt = prompt.into();
        let tenant_id = tenant_id.into();
        let workspace_id = workspace_id.into();

        if prompt.trim().is_empty() {
            return Err(AppError::Validation(
                "prompt cannot be empty or contain only whitespace".to_string(),
            ));
        }

        let char_count = prompt.chars().count();
        if char_count > MAX_PROMPT_LENGTH {
            return Err(AppError::Validation(format!(
                "prompt exceeds maximum length of {} characters (got {})",
                MAX_PROMPT_LENGTH, char_count
            )));
        }

        if tenant_id.trim().is_empty() {
            return Err(AppError::Validation("tenant_id cannot be empty".to_string()));
        }

        if max_tokens == 0 {
            return Err(AppError::Validation(
                "max_tokens must be at least 1".to_string(),
            ));
        }

        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(AppError::Validation(format!(
                "temperature must be between 0.0 and 2.0 (got {})",
                temperature
            )));
        }

        Ok(Self {
            prompt,
            task_type,
            tenant_id,
            workspace_id,
            max_tokens,
            temperature,
        })
    }

    /// Request for the default tenant and workspace with default sampling
    pub fn simple(prompt: impl Into<String>, task_type: TaskType) -> AppResult<Self> {
        Self::new(
            prompt,
            task_type,
            DEFAULT_TENANT,
            DEFAULT_WORKSPACE,
            DEFAULT_MAX_TOKENS,
            DEFAULT_TEMPERATURE,
        )
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl<'de> Deserialize<'de> for RouteRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        fn default_tenant() -> String {
            DEFAULT_TENANT.to_string()
        }
        fn default_workspace() -> String {
            DEFAULT_WORKSPACE.to_string()
        }
        fn default_max_tokens() -> u32 {
            DEFAULT_MAX_TOKENS
        }
        fn default_temperature() -> f64 {
            DEFAULT_TEMPERATURE
        }

        #[derive(Deserialize)]
        struct RawRouteRequest {
            prompt: String,
            #[serde(default)]
            task_type: TaskType,
            #[serde(default = "default_tenant")]
            tenant_id: String,
            #[serde(default = "default_workspace")]
            workspace_id: String,
            #[serde(default = "default_max_tokens")]
            max_tokens: u32,
            #[serde(default = "default_temperature")]
            temperature: f64,
        }

        let raw = RawRouteRequest::deserialize(deserializer)?;
        RouteRequest::new(
            raw.prompt,
            raw.task_type,
            raw.tenant_id,
            raw.workspace_id,
            raw.max_tokens,
            raw.temperature,
        )
        .map_err(serde::de::Error::custom)
    }
}

/// Outcome of a route call
///
/// On success `response_text` is set and `error_kind` is `None`. On failure
/// `error_kind` says why and `error` carries a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub success: bool,
    pub response_text: Option<String>,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    pub latency_ms: f64,
    pub cache_hit: bool,
    pub error_kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on `rate_limited` and on circuit rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl RouteResult {
    pub fn success(text: impl Into<String>, tokens_used: u64, estimated_cost: f64) -> Self {
        Self {
            success: true,
            response_text: Some(text.into()),
            tokens_used,
            estimated_cost,
            latency_ms: 0.0,
            cache_hit: false,
            error_kind: ErrorKind::None,
            error: None,
            retry_after_ms: None,
            model: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            response_text: None,
            tokens_used: 0,
            estimated_cost: 0.0,
            latency_ms: 0.0,
            cache_hit: false,
            error_kind: kind,
            error: Some(message.into()),
            retry_after_ms: None,
            model: None,
        }
    }

    pub fn rate_limited(retry_after_ms: u64) -> Self {
        Self {
            retry_after_ms: Some(retry_after_ms),
            ..Self::failure(
                ErrorKind::RateLimited,
                format!("rate limit exceeded; retry in {}ms", retry_after_ms),
            )
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    pub fn with_cache_hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_default() {
        assert_eq!(TaskType::default(), TaskType::QuestionAnswer);
    }

    #[test]
    fn test_task_type_serde_names_match_as_str() {
        for task in [
            TaskType::CasualChat,
            TaskType::Code,
            TaskType::CreativeWriting,
            TaskType::DeepAnalysis,
            TaskType::DocumentSummary,
            TaskType::QuestionAnswer,
        ] {
            let json = serde_json::to_string(&task).unwrap();
            assert_eq!(json, format!("\"{}\"", task.as_str()));
        }
    }

    #[test]
    fn test_route_request_new_accepts_valid_input() {
        let req = RouteRequest::new("hello", TaskType::Code, "t1", "w1", 16, 0.0).unwrap();
        assert_eq!(req.prompt(), "hello");
        assert_eq!(req.task_type(), TaskType::Code);
        assert_eq!(req.tenant_id(), "t1");
        assert_eq!(req.workspace_id(), "w1");
        assert_eq!(req.max_tokens(), 16);
        assert_eq!(req.temperature(), 0.0);
    }

    #[test]
    fn test_route_request_rejects_whitespace_prompt() {
        let err = RouteRequest::simple("   \n", TaskType::Code).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_route_request_rejects_zero_max_tokens() {
        assert!(RouteRequest::new("hi", TaskType::Code, "t", "w", 0, 0.5).is_err());
    }

    #[test]
    fn test_route_request_rejects_out_of_range_temperature() {
        assert!(RouteRequest::new("hi", TaskType::Code, "t", "w", 1, 2.5).is_err());
        assert!(RouteRequest::new("hi", TaskType::Code, "t", "w", 1, -0.1).is_err());
        assert!(RouteRequest::new("hi", TaskType::Code, "t", "w", 1, f64::NAN).is_err());
        assert!(RouteRequest::new("hi", TaskType::Code, "t", "w", 1, 2.0).is_ok());
    }

    #[test]
    fn test_route_request_rejects_prompt_over_char_limit() {
        let prompt = "é".repeat(MAX_PROMPT_LENGTH + 1);
        assert!(RouteRequest::simple(prompt, TaskType::Code).is_err());

        let prompt = "é".repeat(MAX_PROMPT_LENGTH);
        assert!(RouteRequest::simple(prompt, TaskType::Code).is_ok());
    }

    #[test]
    fn test_route_request_deserializes_with_defaults() {
        let req: RouteRequest = serde_json::from_str(r#"{"prompt": "hi"}"#).unwrap();
        assert_eq!(req.task_type(), TaskType::QuestionAnswer);
        assert_eq!(req.tenant_id(), DEFAULT_TENANT);
        assert_eq!(req.max_tokens(), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_route_request_deserialize_validates() {
        let result = serde_json::from_str::<RouteRequest>(r#"{"prompt": ""}"#);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("prompt cannot be empty"), "got: {msg}");
    }

    #[test]
    fn test_rate_limited_result() {
        let result = RouteResult::rate_limited(1000);
        assert!(!result.success);
        assert_eq!(result.error_kind, ErrorKind::RateLimited);
        assert_eq!(result.retry_after_ms, Some(1000));
        assert!(result.response_text.is_none());
    }

    #[test]
    fn test_success_result_serializes_without_error_fields() {
        let json = serde_json::to_value(RouteResult::success("ok", 3, 0.01)).unwrap();
        assert_eq!(json["error_kind"], "none");
        assert!(json.get("error").is_none());
        assert!(json.get("retry_after_ms").is_none());
    }
}
