use async_trait::async_trait;

use crate::settings::{Provider, ProviderSelection};
use crate::types::{AppResult, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configured client handle: credentials, model and endpoint for one interaction.
///
/// Building one never touches the network; the key is only exercised when the
/// query engine sends its first request.
#[derive(Clone)]
pub struct LLMClient {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub api_base: String,
}

impl LLMClient {
    pub fn new(selection: ProviderSelection) -> Self {
        Self {
            provider: selection.provider,
            api_key: selection.api_key,
            model: selection.model,
            api_base: selection.api_base,
        }
    }

    /// Point the client at a different endpoint (proxies, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl std::fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    model: String,
}

impl LLM {
    pub fn from_client(client: &LLMClient) -> Self {
        let adapter: Box<dyn LLMAdapter> = match client.provider {
            Provider::OpenAI => Box::new(crate::llm::openai::OpenAIAdapter::new_with_api_base(
                &client.api_key,
                &client.api_base,
            )),
            Provider::OpenRouter => Box::new(
                crate::llm::openrouter::OpenRouterAdapter::new_with_api_base(
                    &client.api_key,
                    &client.api_base,
                ),
            ),
        };

        Self {
            adapter,
            model: client.model.clone(),
        }
    }

    pub fn with_adapter(adapter: Box<dyn LLMAdapter>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{resolve_provider, StaticSecrets, OPENROUTER_API_BASE};

    #[test]
    fn test_client_carries_resolved_selection() {
        let secrets = StaticSecrets::from_pairs([("OPENROUTER_API_KEY", "sk-or-abc")]);
        let selection =
            resolve_provider(&secrets, "openrouter", Some("openai/gpt-oss-120b:free (free)")).unwrap();
        let client = LLMClient::new(selection);

        assert_eq!(client.provider, Provider::OpenRouter);
        assert_eq!(client.model, "openai/gpt-oss-120b:free");
        assert_eq!(client.api_base, OPENROUTER_API_BASE);
        assert!(!format!("{:?}", client).contains("sk-or-abc"));

        let llm = LLM::from_client(&client);
        assert_eq!(llm.model(), "openai/gpt-oss-120b:free");
    }
}
