//! Chart file serving
//!
//! Saved charts live in the configured charts directory and are served
//! under `/charts/{file}`.

use std::path::Path;

use axum::Router;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::orchestrator::CHARTS_ROUTE;

pub fn router(charts_dir: &Path) -> Router {
    if let Err(e) = std::fs::create_dir_all(charts_dir) {
        warn!(path = %charts_dir.display(), error = %e, "Could not create charts directory");
    } else {
        info!(path = %charts_dir.display(), "Serving charts");
    }

    Router::new().nest_service(CHARTS_ROUTE, ServeDir::new(charts_dir))
}
