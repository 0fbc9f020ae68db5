//! Query Orchestrator
//!
//! Couples a loaded dataset with an LLM client and the query engine, asks
//! questions, records them in the session history and renders that history
//! for display.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::engine::{ChartArtifact, EngineFactory, EngineOptions, QueryEngine, QueryResponse};
use crate::llm::LLMClient;
use crate::session::{History, HistoryEntry};
use crate::types::AppResult;

/// URL prefix saved charts are served under
pub const CHARTS_ROUTE: &str = "/charts";

const CHART_CAPTION: &str = "Generated chart";

/// Engine switches every session uses: no memoized answers, self-repair on,
/// charts written to disk.
pub const SESSION_OPTIONS: EngineOptions = EngineOptions {
    enable_cache: false,
    use_error_correction: true,
    save_charts: true,
};

pub struct QuerySession {
    dataset: Arc<Dataset>,
    client: LLMClient,
    engine: Arc<dyn QueryEngine>,
    options: EngineOptions,
}

impl QuerySession {
    pub fn new(dataset: Arc<Dataset>, client: LLMClient, factory: &dyn EngineFactory) -> Self {
        let engine = factory.build(client.clone());
        Self {
            dataset,
            client,
            engine,
            options: SESSION_OPTIONS,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Ask one question.
    ///
    /// A blank query is ignored: no engine call, history untouched. On
    /// success exactly one entry is appended; on failure the error is
    /// returned and the history is left as it was.
    pub async fn ask<'h>(
        &self,
        history: &'h mut History,
        query: &str,
    ) -> AppResult<Option<&'h HistoryEntry>> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        info!(
            model = %self.client.model,
            provider = %self.client.provider,
            query_len = query.len(),
            "Running query"
        );
        let response = self.engine.ask(&self.dataset, query, &self.options).await?;

        history.push(HistoryEntry {
            query: query.to_string(),
            response,
            asked_at: Utc::now(),
        });
        Ok(history.last())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderedAnswer {
    Text { text: String },
    Image { src: String, caption: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedEntry {
    pub user: String,
    pub ai: RenderedAnswer,
}

pub fn render_history(history: &[HistoryEntry]) -> Vec<RenderedEntry> {
    history.iter().map(render_entry).collect()
}

pub fn render_entry(entry: &HistoryEntry) -> RenderedEntry {
    let ai = match &entry.response {
        QueryResponse::Text(text) => RenderedAnswer::Text { text: text.clone() },
        QueryResponse::Chart(chart) => match image_source(chart) {
            Ok(src) => RenderedAnswer::Image {
                src,
                caption: CHART_CAPTION.to_string(),
            },
            Err(reason) => {
                warn!(reason = %reason, "Chart could not be displayed, showing raw response");
                RenderedAnswer::Text {
                    text: entry.response.to_string(),
                }
            }
        },
    };

    RenderedEntry {
        user: entry.query.clone(),
        ai,
    }
}

fn image_source(chart: &ChartArtifact) -> Result<String, String> {
    if let Some(png) = chart.png.as_deref().filter(|png| !png.is_empty()) {
        return Ok(format!("data:image/png;base64,{}", BASE64.encode(png)));
    }
    let path = chart.path.as_deref().ok_or("chart has neither a file nor image data")?;
    if !path.is_file() {
        return Err(format!("{} does not exist", path.display()));
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("{} has no usable file name", path.display()))?;
    Ok(format!("{}/{}", CHARTS_ROUTE, file_name))
}
