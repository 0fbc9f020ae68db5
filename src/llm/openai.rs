// OpenAI-compatible chat completion adapter
// Also used for OpenRouter, which speaks the same wire format.

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_API_BASE: &str = crate::settings::OPENAI_API_BASE;

pub struct OpenAIAdapter {
    client: Client,
    api_key: String,
    api_base: String,
    extra_headers: Vec<(&'static str, String)>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl OpenAIAdapter {
    pub fn new(api_key: &str) -> Self {
        Self::new_with_api_base(api_key, OPENAI_API_BASE)
    }

    pub fn new_with_api_base(api_key: &str, api_base: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            extra_headers: Vec::new(),
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    fn error_message(status: StatusCode, body: &str) -> String {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) => match parsed.error.code {
                Some(code) => format!("{} ({}, code: {})", parsed.error.message, status, code),
                None => format!("{} ({})", parsed.error.message, status),
            },
            Err(_) => format!("{} ({})", body.trim(), status),
        }
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let url = format!("{}/chat/completions", self.api_base);

        let body = ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        debug!(url = %url, model = %request.model, messages = request.messages.len(), "Sending chat completion");

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("Request to {} failed: {}", self.api_base, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = Self::error_message(status, &error_text);
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AppError::RateLimited(message));
            }
            return Err(AppError::LLMApi(message));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse chat completion: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("Model returned no choices".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLMMessage;

    fn request() -> LLMRequest {
        LLMRequest {
            model: "gpt-4".to_string(),
            messages: vec![LLMMessage::system("be brief"), LLMMessage::user("hi")],
            max_tokens: Some(16),
            temperature: Some(0.0),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4",
                "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],
                    "usage":{"prompt_tokens":5,"completion_tokens":1,"total_tokens":6}}"#,
            )
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new_with_api_base("sk-test", &server.url());
        let response = adapter.create_chat_completion(&request()).await.unwrap();

        assert_eq!(response.content, "hello");
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 6);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"Rate limit exceeded","code":429}}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new_with_api_base("sk-test", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        match err {
            AppError::RateLimited(msg) => assert!(msg.contains("Rate limit exceeded")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_api_error_carries_upstream_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new_with_api_base("sk-bad", &server.url());
        let err = adapter.create_chat_completion(&request()).await.unwrap_err();
        match err {
            AppError::LLMApi(msg) => {
                assert!(msg.contains("Incorrect API key provided"));
                assert!(msg.contains("401"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new_with_api_base("sk-test", &server.url());
        assert!(matches!(
            adapter.create_chat_completion(&request()).await,
            Err(AppError::LLMApi(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed_from_base() {
        let adapter = OpenAIAdapter::new_with_api_base("k", "https://example.test/v1/");
        assert_eq!(adapter.api_base, "https://example.test/v1");
        assert_eq!(OpenAIAdapter::new("k").api_base, OPENAI_API_BASE);
    }
}
