//! Provider catalog API
//!
//! - GET /api/providers - providers, their models and whether a key is configured

use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use super::{provider_catalog, ProviderInfo};
use crate::models::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/providers", get(list_providers))
        .with_state(state)
}

/// GET /api/providers
async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let catalog = provider_catalog(state.secrets.as_ref());
    info!(
        configured = catalog.iter().filter(|p| p.has_key).count(),
        "Listing providers"
    );
    Json(catalog)
}
