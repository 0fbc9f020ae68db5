use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub secrets_path: PathBuf,
    pub query: QueryConfig,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_mb: usize,
    /// Minutes a session may go unused before it is dropped; 0 keeps sessions forever
    pub session_idle_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub charts_dir: PathBuf,
    pub max_retries: u32,
    pub preview_rows: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
                cors_allowed_origins: vec!["*".to_string()],
                max_upload_mb: 200,
                session_idle_minutes: 60,
            },
            secrets_path: PathBuf::from("secrets.toml"),
            query: QueryConfig {
                charts_dir: PathBuf::from("exports/charts"),
                max_retries: 3,
                preview_rows: 5,
            },
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            server: ServerConfig {
                port: parse_var("PORT", defaults.server.port)?,
                host: env::var("HOST").unwrap_or(defaults.server.host),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .map(|v| split_origins(&v))
                    .unwrap_or(defaults.server.cors_allowed_origins),
                max_upload_mb: parse_var("MAX_UPLOAD_MB", defaults.server.max_upload_mb)?,
                session_idle_minutes: parse_var("SESSION_IDLE_MINUTES", defaults.server.session_idle_minutes)?,
            },
            secrets_path: env::var("SECRETS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.secrets_path),
            query: QueryConfig {
                charts_dir: env::var("CHARTS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.query.charts_dir),
                max_retries: parse_var("QUERY_MAX_RETRIES", defaults.query.max_retries)?,
                preview_rows: parse_var("PREVIEW_ROWS", defaults.query.preview_rows)?,
            },
            log_dir: env::var("LOG_DIR").ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            charts_dir: self.query.charts_dir.clone(),
            max_retries: self.query.max_retries.max(1),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn session_idle_timeout(&self) -> Option<Duration> {
        match self.server.session_idle_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes.saturating_mul(60))),
        }
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
