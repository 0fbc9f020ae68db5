//! API Routes
//!
//! - `/` - single-page UI
//! - `/api/health` - health check
//! - `/api/providers` - provider and model catalog
//! - `/api/sessions` - sessions, dataset upload, questions and history
//! - `/charts/{file}` - saved chart images

pub mod health;
pub mod sessions;
pub mod static_files;
pub mod ui;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::apply_cors;
use crate::models::AppState;
use crate::settings;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = state.config.max_upload_bytes();
    let origins = state.config.server.cors_allowed_origins.clone();
    let charts_dir = state.config.query.charts_dir.clone();

    let router = Router::new()
        .merge(ui::router())
        .merge(health::router(state.clone()))
        .merge(settings::routes::router(state.clone()))
        .merge(sessions::router(state))
        .merge(static_files::router(&charts_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http());

    apply_cors(router, &origins)
}
