//! Query Engine
//!
//! Turns a natural-language question about a [`Dataset`] into either a text
//! answer or a chart. The orchestrator only sees the [`QueryEngine`] trait;
//! [`LlmQueryEngine`] is the production implementation.

pub mod chart;
pub mod llm_engine;
pub mod plan;

pub use llm_engine::*;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::dataset::Dataset;
use crate::llm::LLMClient;
use crate::types::AppResult;

/// Per-call engine switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub enable_cache: bool,
    pub use_error_correction: bool,
    pub save_charts: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            enable_cache: false,
            use_error_correction: true,
            save_charts: true,
        }
    }
}

/// A chart produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartArtifact {
    pub title: String,
    /// Set when the chart was saved to the charts directory
    pub path: Option<PathBuf>,
    /// PNG bytes, kept in memory when charts are not saved
    #[serde(skip)]
    pub png: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum QueryResponse {
    Text(String),
    Chart(ChartArtifact),
}

impl std::fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryResponse::Text(text) => write!(f, "{}", text),
            QueryResponse::Chart(chart) => match &chart.path {
                Some(path) => write!(f, "{}", path.display()),
                None => write!(f, "{}", chart.title),
            },
        }
    }
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn ask(
        &self,
        dataset: &Dataset,
        question: &str,
        options: &EngineOptions,
    ) -> AppResult<QueryResponse>;
}

/// Builds an engine bound to one interaction's LLM client
pub trait EngineFactory: Send + Sync {
    fn build(&self, client: LLMClient) -> Arc<dyn QueryEngine>;
}

/// Memoized responses keyed by a fingerprint of model, schema and question
#[derive(Clone, Default)]
pub struct ResponseCache {
    inner: Arc<RwLock<HashMap<String, QueryResponse>>>,
}

impl ResponseCache {
    pub fn fingerprint(model: &str, dataset: &Dataset, question: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        for column in dataset.columns() {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(dataset.row_count().to_le_bytes());
        hasher.update(question.trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<QueryResponse> {
        let guard = self.inner.read().await;
        guard.get(key).cloned()
    }

    pub async fn insert(&self, key: String, response: QueryResponse) {
        let mut guard = self.inner.write().await;
        guard.insert(key, response);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
