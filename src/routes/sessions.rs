//! Session API
//!
//! One session holds the uploaded dataset and the question history of one
//! browser tab. Every interaction resolves the provider first; a missing API
//! key stops it before the dataset is parsed or the engine is called.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::dataset::{load_dataset, DatasetFormat};
use crate::llm::LLMClient;
use crate::models::{AppState, AskRequest, HistoryResponse, SessionCreated, UploadResponse};
use crate::orchestrator::{render_history, QuerySession};
use crate::session::LoadedDataset;
use crate::settings::{resolve_provider, Provider};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(end_session))
        .route("/api/sessions/{id}/dataset", post(upload_dataset))
        .route("/api/sessions/{id}/ask", post(ask))
        .route("/api/sessions/{id}/history", get(history))
        .with_state(state)
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create().await;
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn end_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<StatusCode> {
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("session {}", id)))
    }
}

/// Form fields of a dataset upload
#[derive(Default)]
struct UploadForm {
    provider: Option<String>,
    model: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();
    let bad_form = |e: axum::extract::multipart::MultipartError| AppError::InvalidRequest(e.to_string());

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "provider" => form.provider = Some(field.text().await.map_err(bad_form)?),
            "model" => form.model = Some(field.text().await.map_err(bad_form)?),
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(bad_form)?;
                form.file = Some((filename, data.to_vec()));
            }
            _ => {}
        }
    }
    Ok(form)
}

/// POST /api/sessions/{id}/dataset
async fn upload_dataset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let handle = state.sessions.get(&id).await?;
    let form = read_upload_form(multipart).await?;

    let provider_id = form.provider.unwrap_or_else(|| Provider::OpenAI.to_string());
    let selection = resolve_provider(state.secrets.as_ref(), &provider_id, form.model.as_deref())?;

    let (filename, data) = form
        .file
        .filter(|(name, _)| !name.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("a file field with a file name is required".to_string()))?;

    let format = DatasetFormat::from_filename(&filename);
    let dataset = load_dataset(&filename, &data)?;
    let preview = dataset.preview(state.config.query.preview_rows);
    let columns = dataset.columns().to_vec();

    let mut session = handle.lock().await;
    session.dataset = Some(LoadedDataset {
        filename: filename.clone(),
        dataset: Arc::new(dataset),
        loaded_at: Utc::now(),
    });
    info!(session_id = %id, filename = %filename, format = format.as_str(), "Dataset attached to session");

    Ok(Json(UploadResponse {
        filename,
        format: format.as_str(),
        provider: selection.provider.to_string(),
        model: selection.model,
        columns,
        preview,
        history: render_history(&session.history),
    }))
}

/// POST /api/sessions/{id}/ask
async fn ask(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> AppResult<Json<HistoryResponse>> {
    let handle = state.sessions.get(&id).await?;
    let selection = resolve_provider(state.secrets.as_ref(), &request.provider, request.model.as_deref())?;
    let client = LLMClient::new(selection);

    let mut session = handle.lock().await;
    let loaded = session.dataset.clone().ok_or(AppError::NoDataset)?;
    info!(session_id = %id, dataset = %loaded.filename, asked = session.history.len(), "Question received");

    let query_session = QuerySession::new(loaded.dataset, client, state.engines.as_ref());
    query_session.ask(&mut session.history, &request.query).await?;

    Ok(Json(HistoryResponse {
        session_id: id,
        dataset: Some(loaded.filename),
        history: render_history(&session.history),
    }))
}

/// GET /api/sessions/{id}/history
async fn history(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<HistoryResponse>> {
    let handle = state.sessions.get(&id).await?;
    let session = handle.lock().await;

    Ok(Json(HistoryResponse {
        session_id: id,
        dataset: session.dataset.as_ref().map(|d| d.filename.clone()),
        history: render_history(&session.history),
    }))
}
