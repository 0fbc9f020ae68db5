//! Provider Selection
//!
//! Resolves the user's provider choice into an API key, API base URL and
//! model identifier. Keys come from a [`SecretStore`]; a missing key halts the
//! interaction with a warning before anything else is constructed.

pub mod routes;
pub mod secrets;

pub use secrets::*;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

pub const OPENAI_KEY_NAME: &str = "OPENAI_API_KEY";
pub const OPENROUTER_KEY_NAME: &str = "OPENROUTER_API_KEY";

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4";

/// OpenRouter models offered in the sidebar, as (identifier, tier label).
pub const OPENROUTER_MODELS: &[(&str, &str)] = &[
    ("openai/gpt-oss-20b:free", "free"),
    ("openai/gpt-oss-120b:free", "free"),
    ("nvidia/llama-3.1-nemotron-ultra-253b-v1:free", "free"),
    ("qwen/qwen3-coder:free", "free"),
];

/// Supported LLM providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    OpenRouter,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAI => write!(f, "openai"),
            Provider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAI, Provider::OpenRouter];

    /// Accepts the lowercase id or the display name, case-insensitively.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "openrouter" => Some(Provider::OpenRouter),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::OpenRouter => "OpenRouter",
        }
    }

    pub fn secret_key(&self) -> &'static str {
        match self {
            Provider::OpenAI => OPENAI_KEY_NAME,
            Provider::OpenRouter => OPENROUTER_KEY_NAME,
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => OPENAI_API_BASE,
            Provider::OpenRouter => OPENROUTER_API_BASE,
        }
    }

    pub fn missing_key_warning(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI key not set. Switch to OpenRouter or provide a key.",
            Provider::OpenRouter => "OpenRouter key not set. Provide a key to use this provider.",
        }
    }

    /// Turn the sidebar model input into a bare model identifier.
    pub fn resolve_model(&self, input: Option<&str>) -> Result<String, SelectionError> {
        let input = input.map(str::trim).filter(|s| !s.is_empty());
        match self {
            Provider::OpenAI => Ok(input.unwrap_or(OPENAI_DEFAULT_MODEL).to_string()),
            Provider::OpenRouter => {
                let Some(choice) = input else {
                    return Ok(OPENROUTER_MODELS[0].0.to_string());
                };
                let id = decompose_label(choice);
                if OPENROUTER_MODELS.iter().any(|(known, _)| *known == id) {
                    Ok(id.to_string())
                } else {
                    Err(SelectionError::UnknownModel {
                        provider: *self,
                        model: choice.to_string(),
                    })
                }
            }
        }
    }
}

/// Build the user-facing label for a catalog model, e.g. `qwen/qwen3-coder:free (free)`.
pub fn compose_label(id: &str, tier: &str) -> String {
    format!("{} ({})", id, tier)
}

/// Strip the tier annotation from a label, leaving the model identifier.
pub fn decompose_label(label: &str) -> &str {
    label.trim().split(' ').next().unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("{}", .provider.missing_key_warning())]
    MissingCredential {
        provider: Provider,
        key: &'static str,
    },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Model '{model}' is not available for {provider}")]
    UnknownModel { provider: Provider, model: String },
}

/// Everything the client factory needs for one interaction
#[derive(Clone, PartialEq)]
pub struct ProviderSelection {
    pub provider: Provider,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
}

impl std::fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("provider", &self.provider)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Resolve a provider choice into credentials, endpoint and model.
///
/// The credential is checked before the model so a missing key always
/// surfaces as the warning, whatever the model input.
pub fn resolve_provider(
    secrets: &dyn SecretStore,
    provider_id: &str,
    model_input: Option<&str>,
) -> Result<ProviderSelection, SelectionError> {
    let provider = Provider::from_id(provider_id)
        .ok_or_else(|| SelectionError::UnsupportedProvider(provider_id.to_string()))?;

    let api_key = match secrets.get(provider.secret_key()) {
        Some(key) if !key.trim().is_empty() => key,
        _ => {
            warn!(provider = %provider, key = provider.secret_key(), "API key not configured");
            return Err(SelectionError::MissingCredential {
                provider,
                key: provider.secret_key(),
            });
        }
    };

    let model = provider.resolve_model(model_input)?;
    debug!(provider = %provider, model = %model, "Provider resolved");

    Ok(ProviderSelection {
        provider,
        api_key,
        api_base: provider.api_base().to_string(),
        model,
    })
}

/// Provider information for the sidebar
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    /// "text" for free-form entry, "select" for a fixed list
    pub model_input: &'static str,
    pub default_model: String,
    pub models: Vec<ModelOption>,
    /// Whether the secret store currently holds a key for this provider
    pub has_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelOption {
    pub id: String,
    pub label: String,
}

pub fn provider_catalog(secrets: &dyn SecretStore) -> Vec<ProviderInfo> {
    Provider::ALL
        .iter()
        .map(|provider| {
            let has_key = secrets
                .get(provider.secret_key())
                .is_some_and(|k| !k.trim().is_empty());
            let warning = (!has_key).then(|| provider.missing_key_warning());
            match provider {
                Provider::OpenAI => ProviderInfo {
                    id: provider.to_string(),
                    name: provider.display_name().to_string(),
                    model_input: "text",
                    default_model: OPENAI_DEFAULT_MODEL.to_string(),
                    models: Vec::new(),
                    has_key,
                    warning,
                },
                Provider::OpenRouter => ProviderInfo {
                    id: provider.to_string(),
                    name: provider.display_name().to_string(),
                    model_input: "select",
                    default_model: OPENROUTER_MODELS[0].0.to_string(),
                    models: OPENROUTER_MODELS
                        .iter()
                        .map(|(id, tier)| ModelOption {
                            id: id.to_string(),
                            label: compose_label(id, tier),
                        })
                        .collect(),
                    has_key,
                    warning,
                },
            }
        })
        .collect()
}
