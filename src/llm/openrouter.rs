use crate::llm::provider::LLMAdapter;
use crate::types::{AppResult, LLMRequest, LLMResponse};
use async_trait::async_trait;

const OPENROUTER_API_BASE: &str = crate::settings::OPENROUTER_API_BASE;

// OpenRouter uses these to attribute traffic on its dashboard
const APP_REFERER: &str = "https://github.com/datachat/datachat";
const APP_TITLE: &str = "Datachat";

pub struct OpenRouterAdapter {
    inner: crate::llm::openai::OpenAIAdapter,
}

impl OpenRouterAdapter {
    pub fn new(api_key: &str) -> Self {
        Self::new_with_api_base(api_key, OPENROUTER_API_BASE)
    }

    pub fn new_with_api_base(api_key: &str, api_base: &str) -> Self {
        Self {
            inner: crate::llm::openai::OpenAIAdapter::new_with_api_base(api_key, api_base)
                .with_header("HTTP-Referer", APP_REFERER)
                .with_header("X-Title", APP_TITLE),
        }
    }
}

#[async_trait]
impl LLMAdapter for OpenRouterAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.inner.create_chat_completion(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LLMMessage;

    #[tokio::test]
    async fn test_sends_attribution_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("x-title", APP_TITLE)
            .match_header("http-referer", APP_REFERER)
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"ok"},"finish_reason":"stop"}]}"#)
            .create_async()
            .await;

        let adapter = OpenRouterAdapter::new_with_api_base("sk-or", &server.url());
        let response = adapter
            .create_chat_completion(&LLMRequest {
                model: "qwen/qwen3-coder:free".to_string(),
                messages: vec![LLMMessage::user("ping")],
                max_tokens: None,
                temperature: None,
            })
            .await
            .unwrap();

        assert_eq!(response.content, "ok");
        mock.assert_async().await;
    }
}
