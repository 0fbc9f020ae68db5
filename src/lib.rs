// Datachat - ask questions about a CSV or Excel file in plain language

pub mod config;
pub mod models;
pub mod types;
pub mod llm;
pub mod settings;  // Provider selection and secret store
pub mod dataset;
pub mod engine;
pub mod orchestrator;
pub mod session;
pub mod routes;
pub mod middleware;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
