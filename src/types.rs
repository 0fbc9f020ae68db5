// Shared type definitions: LLM wire-independent messages and the application error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::engine::plan::PlanError;
use crate::settings::SelectionError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system"
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("LLM rate limit reached: {0}")]
    RateLimited(String),

    #[error("Could not generate a valid answer: {0}")]
    Plan(#[from] PlanError),

    #[error("Failed to parse uploaded file: {0}")]
    DatasetParse(String),

    #[error("No dataset loaded for this session")]
    NoDataset,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Short machine-readable tag sent alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Selection(SelectionError::MissingCredential { .. }) => "warning",
            AppError::Selection(_) => "configuration",
            AppError::LLMApi(_) => "llm_api",
            AppError::RateLimited(_) => "rate_limited",
            AppError::Plan(_) => "generation",
            AppError::DatasetParse(_) => "parse",
            AppError::NoDataset => "no_dataset",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Selection(SelectionError::MissingCredential { .. }) => {
                StatusCode::PRECONDITION_FAILED
            }
            AppError::Selection(_) => StatusCode::BAD_REQUEST,
            AppError::LLMApi(_) | AppError::Plan(_) => StatusCode::BAD_GATEWAY,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::DatasetParse(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NoDataset => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, kind = self.kind(), "Request rejected");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}
