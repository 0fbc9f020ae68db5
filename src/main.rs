use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use datachat::{
    config::Config,
    engine::LlmEngineFactory,
    routes::create_router,
    settings::FileSecretStore,
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "datachat=debug,tower_http=debug,axum=debug".into());

    match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "datachat.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    let _log_guard = init_tracing(&config);
    info!("Configuration loaded: {:?}", config.server);

    let secrets = FileSecretStore::load(&config.secrets_path)?;
    let engines = LlmEngineFactory::new(config.engine_settings());

    // Create shared state
    let state = AppState::new(config.clone(), Arc::new(secrets), Arc::new(engines));

    if let Some(max_idle) = config.session_idle_timeout() {
        let every = (max_idle / 4).clamp(Duration::from_secs(15), Duration::from_secs(300));
        state.sessions.spawn_expiry(max_idle, every);
        info!("Sessions expire after {:?} idle", max_idle);
    }

    // Create router
    let app = create_router(state);

    // Start server
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HOST {:?}: {}", config.server.host, e))?;
    let addr = SocketAddr::from((host, config.server.port));
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
