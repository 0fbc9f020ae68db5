use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::chart::render_chart;
use super::plan::{self, PlanError, PlanOutcome, PreparedChart};
use super::{ChartArtifact, EngineFactory, EngineOptions, QueryEngine, QueryResponse, ResponseCache};
use crate::dataset::Dataset;
use crate::llm::{LLMClient, LLM};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

/// Rows of the dataset shown to the model alongside the schema
const SAMPLE_ROWS: usize = 5;
const MAX_TOKENS: u32 = 1024;

const SYSTEM_INSTRUCTION: &str = r#"You are a data analyst answering questions about a table.
Reply with exactly one JSON object and nothing else. Choose one of:
{"type":"answer","text":"..."}  - for questions answerable from the schema or sample alone
{"type":"aggregate","op":"count|sum|mean|min|max|median|distinct","column":"<column>","group_by":"<column or omit>"}
{"type":"filter_count","column":"<column>","equals":<value>}
{"type":"chart","kind":"bar|line|scatter|histogram","x":"<column>","y":"<column or omit>","title":"..."}
Use column names exactly as listed. Ask for a chart whenever the user wants a plot, graph or visualisation."#;

/// Engine settings shared by every session
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub charts_dir: PathBuf,
    /// Attempts per question when error correction is on
    pub max_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            charts_dir: PathBuf::from("exports/charts"),
            max_retries: 3,
        }
    }
}

pub struct LlmQueryEngine {
    llm: LLM,
    settings: EngineSettings,
    cache: ResponseCache,
}

impl LlmQueryEngine {
    pub fn new(client: &LLMClient, settings: EngineSettings, cache: ResponseCache) -> Self {
        Self::with_llm(LLM::from_client(client), settings, cache)
    }

    pub fn with_llm(llm: LLM, settings: EngineSettings, cache: ResponseCache) -> Self {
        Self { llm, settings, cache }
    }

    fn build_prompt(dataset: &Dataset, question: &str) -> String {
        let kinds = dataset.column_kinds();
        let schema: Vec<String> = dataset
            .columns()
            .iter()
            .zip(kinds.iter())
            .map(|(name, kind)| format!("- {} ({})", name, kind.as_str()))
            .collect();

        format!(
            "The table has {rows} rows and these columns:\n{schema}\n\nFirst rows as CSV:\n{sample}\nQuestion: {question}",
            rows = dataset.row_count(),
            schema = schema.join("\n"),
            sample = dataset.to_csv_snippet(SAMPLE_ROWS),
            question = question.trim(),
        )
    }

    fn correction_prompt(error: &PlanError) -> String {
        format!(
            "That plan failed: {}. Fix it and reply with a single corrected JSON object.",
            error
        )
    }

    async fn run_plan(
        &self,
        reply: &str,
        dataset: &Dataset,
        options: &EngineOptions,
    ) -> Result<QueryResponse, PlanError> {
        let plan = plan::parse_plan(reply)?;
        debug!(?plan, "Executing plan");

        match plan::execute(&plan, dataset)? {
            PlanOutcome::Text(text) => Ok(QueryResponse::Text(text)),
            PlanOutcome::Chart(chart) => {
                let charts_dir = self.settings.charts_dir.clone();
                let save = options.save_charts;
                // plotters and the file system both block
                tokio::task::spawn_blocking(move || write_chart(chart, &charts_dir, save))
                    .await
                    .map_err(|e| PlanError::Render(e.to_string()))?
            }
        }
    }
}

/// Render a chart under a fresh name in `charts_dir`. Unsaved charts are read
/// back into memory and the file removed.
fn write_chart(chart: PreparedChart, charts_dir: &Path, save: bool) -> Result<QueryResponse, PlanError> {
    std::fs::create_dir_all(charts_dir).map_err(|e| PlanError::Render(e.to_string()))?;
    let path = charts_dir.join(format!("{}.png", Uuid::new_v4()));
    render_chart(&chart, &path).map_err(|e| PlanError::Render(e.to_string()))?;

    if save {
        info!(path = %path.display(), "Chart saved");
        return Ok(QueryResponse::Chart(ChartArtifact {
            title: chart.title,
            path: Some(path),
            png: None,
        }));
    }

    let png = std::fs::read(&path).map_err(|e| PlanError::Render(e.to_string()))?;
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %e, "Failed to remove temporary chart");
    }
    Ok(QueryResponse::Chart(ChartArtifact {
        title: chart.title,
        path: None,
        png: Some(png),
    }))
}

#[async_trait]
impl QueryEngine for LlmQueryEngine {
    async fn ask(
        &self,
        dataset: &Dataset,
        question: &str,
        options: &EngineOptions,
    ) -> AppResult<QueryResponse> {
        let cache_key = options
            .enable_cache
            .then(|| ResponseCache::fingerprint(self.llm.model(), dataset, question));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key).await {
                debug!(key = %key, "Answer served from cache");
                return Ok(hit);
            }
        }

        let attempts = if options.use_error_correction {
            self.settings.max_retries.max(1)
        } else {
            1
        };

        let mut messages = vec![
            LLMMessage::system(SYSTEM_INSTRUCTION),
            LLMMessage::user(Self::build_prompt(dataset, question)),
        ];
        let mut last_error = None;

        for attempt in 1..=attempts {
            let request = LLMRequest {
                model: self.llm.model().to_string(),
                messages: messages.clone(),
                max_tokens: Some(MAX_TOKENS),
                temperature: Some(0.0),
            };
            // Remote API failures propagate straight away; only bad plans are corrected
            let reply = self.llm.create_chat_completion(&request).await?;

            match self.run_plan(&reply.content, dataset, options).await {
                Ok(response) => {
                    info!(attempt, model = %self.llm.model(), "Question answered");
                    if let Some(key) = cache_key {
                        self.cache.insert(key, response.clone()).await;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "Generated plan failed");
                    messages.push(LLMMessage::assistant(reply.content));
                    messages.push(LLMMessage::user(Self::correction_prompt(&err)));
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .map(AppError::from)
            .unwrap_or_else(|| AppError::Internal("query engine made no attempts".to_string())))
    }
}

/// Builds [`LlmQueryEngine`]s that share settings and a response cache
#[derive(Clone, Default)]
pub struct LlmEngineFactory {
    settings: EngineSettings,
    cache: ResponseCache,
}

impl LlmEngineFactory {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            cache: ResponseCache::default(),
        }
    }
}

impl EngineFactory for LlmEngineFactory {
    fn build(&self, client: LLMClient) -> Arc<dyn QueryEngine> {
        Arc::new(LlmQueryEngine::new(&client, self.settings.clone(), self.cache.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::load_dataset;
    use crate::llm::LLMAdapter;
    use crate::settings::{resolve_provider, StaticSecrets};
    use crate::types::{LLMResponse, TokenUsage};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays canned replies and records every request it receives
    struct ScriptedAdapter {
        replies: Mutex<VecDeque<AppResult<String>>>,
        requests: Arc<Mutex<Vec<LLMRequest>>>,
    }

    #[async_trait]
    impl LLMAdapter for ScriptedAdapter {
        async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::LLMApi("script exhausted".into())));
            next.map(|content| LLMResponse {
                content,
                finish_reason: "stop".into(),
                usage: TokenUsage::default(),
            })
        }
    }

    fn scripted(
        replies: Vec<AppResult<String>>,
        charts_dir: &Path,
    ) -> (LlmQueryEngine, Arc<Mutex<Vec<LLMRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let adapter = ScriptedAdapter {
            replies: Mutex::new(replies.into()),
            requests: requests.clone(),
        };
        let engine = LlmQueryEngine::with_llm(
            LLM::with_adapter(Box::new(adapter), "test-model"),
            EngineSettings {
                charts_dir: charts_dir.to_path_buf(),
                max_retries: 3,
            },
            ResponseCache::default(),
        );
        (engine, requests)
    }

    fn dataset() -> Dataset {
        load_dataset("data.csv", b"region,units\nnorth,4\nsouth,6\nnorth,5\n").unwrap()
    }

    #[tokio::test]
    async fn test_text_answer_from_aggregate_plan() {
        let dir = TempDir::new().unwrap();
        let (engine, requests) = scripted(
            vec![Ok(r#"{"type":"aggregate","op":"sum","column":"units"}"#.into())],
            dir.path(),
        );

        let response = engine
            .ask(&dataset(), "How many units in total?", &EngineOptions::default())
            .await
            .unwrap();

        assert_eq!(response, QueryResponse::Text("sum of units: 15".into()));
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].messages[1].content;
        assert!(prompt.contains("- units (int)"));
        assert!(prompt.contains("Question: How many units in total?"));
    }

    #[tokio::test]
    async fn test_error_correction_feeds_failure_back() {
        let dir = TempDir::new().unwrap();
        let (engine, requests) = scripted(
            vec![
                Ok(r#"{"type":"aggregate","op":"sum","column":"quantity"}"#.into()),
                Ok(r#"{"type":"aggregate","op":"sum","column":"units"}"#.into()),
            ],
            dir.path(),
        );

        let response = engine
            .ask(&dataset(), "total units?", &EngineOptions::default())
            .await
            .unwrap();

        assert_eq!(response, QueryResponse::Text("sum of units: 15".into()));
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let retry = &requests[1].messages;
        assert_eq!(retry.len(), 4);
        assert_eq!(retry[2].role, "assistant");
        assert!(retry[3].content.contains("unknown column 'quantity'"));
    }

    #[tokio::test]
    async fn test_without_error_correction_first_failure_is_returned() {
        let dir = TempDir::new().unwrap();
        let (engine, requests) = scripted(
            vec![
                Ok("I think the answer is 15".into()),
                Ok(r#"{"type":"answer","text":"15"}"#.into()),
            ],
            dir.path(),
        );
        let options = EngineOptions {
            use_error_correction: false,
            ..EngineOptions::default()
        };

        let err = engine.ask(&dataset(), "total?", &options).await.unwrap_err();
        assert!(matches!(err, AppError::Plan(PlanError::Malformed(_))));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let dir = TempDir::new().unwrap();
        let bad = || Ok(r#"{"type":"aggregate","op":"mean","column":"region"}"#.to_string());
        let (engine, requests) = scripted(vec![bad(), bad(), bad(), bad()], dir.path());

        let err = engine
            .ask(&dataset(), "average region?", &EngineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Plan(PlanError::NotNumeric(_))));
        assert_eq!(requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_api_errors_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let (engine, requests) = scripted(
            vec![Err(AppError::RateLimited("429".into()))],
            dir.path(),
        );

        let err = engine
            .ask(&dataset(), "anything", &EngineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited(_)));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_saved_chart_lands_in_charts_dir() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = scripted(
            vec![Ok(r#"{"type":"chart","kind":"bar","x":"region","y":"units"}"#.into())],
            dir.path(),
        );

        let response = engine
            .ask(&dataset(), "plot units by region", &EngineOptions::default())
            .await
            .unwrap();

        let QueryResponse::Chart(chart) = response else {
            panic!("expected a chart");
        };
        let path = chart.path.expect("saved chart has a path");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
        assert!(chart.png.is_none());
    }

    #[tokio::test]
    async fn test_unsaved_chart_is_kept_in_memory() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = scripted(
            vec![Ok(r#"{"type":"chart","kind":"histogram","x":"units"}"#.into())],
            dir.path(),
        );
        let options = EngineOptions {
            save_charts: false,
            ..EngineOptions::default()
        };

        let response = engine.ask(&dataset(), "histogram of units", &options).await.unwrap();
        let QueryResponse::Chart(chart) = response else {
            panic!("expected a chart");
        };
        assert!(chart.path.is_none());
        assert!(chart.png.is_some_and(|png| !png.is_empty()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unplottable_chart_is_a_render_error() {
        let dir = TempDir::new().unwrap();
        let chart = PreparedChart {
            title: "Spread".into(),
            x_label: "x".into(),
            y_label: "count".into(),
            data: plan::ChartData::Histogram {
                values: vec![-1e308, 1e308],
                bins: 10,
            },
        };

        let err = write_chart(chart, dir.path(), true).unwrap_err();
        assert!(matches!(err, PlanError::Render(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cache_only_consulted_when_enabled() {
        let dir = TempDir::new().unwrap();
        let reply = || Ok(r#"{"type":"answer","text":"cached"}"#.to_string());
        let (engine, requests) = scripted(vec![reply(), reply(), reply()], dir.path());

        let cached = EngineOptions {
            enable_cache: true,
            ..EngineOptions::default()
        };
        engine.ask(&dataset(), "q", &cached).await.unwrap();
        engine.ask(&dataset(), "q", &cached).await.unwrap();
        assert_eq!(requests.lock().unwrap().len(), 1);

        engine.ask(&dataset(), "q", &EngineOptions::default()).await.unwrap();
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_factory_engine_talks_to_configured_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":"{\"type\":\"aggregate\",\"op\":\"max\",\"column\":\"units\"}"},"finish_reason":"stop"}]}"#,
            )
            .create_async()
            .await;

        let secrets = StaticSecrets::from_pairs([("OPENAI_API_KEY", "sk-test")]);
        let client = LLMClient::new(resolve_provider(&secrets, "openai", None).unwrap())
            .with_api_base(server.url());
        let dir = TempDir::new().unwrap();
        let factory = LlmEngineFactory::new(EngineSettings {
            charts_dir: dir.path().to_path_buf(),
            max_retries: 3,
        });

        let response = factory
            .build(client)
            .ask(&dataset(), "largest order?", &EngineOptions::default())
            .await
            .unwrap();

        assert_eq!(response, QueryResponse::Text("max of units: 6".into()));
        mock.assert_async().await;
    }
}
