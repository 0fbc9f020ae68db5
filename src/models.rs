use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::dataset::DatasetPreview;
use crate::engine::EngineFactory;
use crate::orchestrator::RenderedEntry;
use crate::session::SessionStore;
use crate::settings::SecretStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub secrets: Arc<dyn SecretStore>,
    pub engines: Arc<dyn EngineFactory>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config, secrets: Arc<dyn SecretStore>, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            secrets,
            engines,
            sessions: SessionStore::default(),
        }
    }
}

// API Request/Response types

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub provider: String,
    /// Model id, or an OpenRouter catalog label
    pub model: Option<String>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub format: &'static str,
    pub provider: String,
    pub model: String,
    pub columns: Vec<String>,
    pub preview: DatasetPreview,
    pub history: Vec<RenderedEntry>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    /// File name of the loaded dataset, if any
    pub dataset: Option<String>,
    pub history: Vec<RenderedEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
}
