//! Secret Store
//!
//! Read-only key -> string lookup for provider API keys. The file-backed store
//! reads a TOML secrets file and layers process environment variables on top.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Secrets loaded once at startup from `secrets.toml` plus the environment
#[derive(Debug, Clone, Default)]
pub struct FileSecretStore {
    values: HashMap<String, String>,
}

impl FileSecretStore {
    /// Load secrets from `path`. A missing file is fine; the environment
    /// can still provide every key.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::default())
            .build()?;

        let raw: HashMap<String, config::Value> = settings.try_deserialize()?;
        let values: HashMap<String, String> = raw
            .into_iter()
            .filter_map(|(k, v)| v.into_string().ok().map(|s| (k.to_lowercase(), s)))
            .collect();

        if path.exists() {
            info!(path = %path.display(), "Loaded secrets file");
        } else {
            debug!(path = %path.display(), "No secrets file found, using environment only");
        }

        Ok(Self { values })
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&key.to_lowercase()).cloned()
    }
}

/// In-memory secrets, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretStore for StaticSecrets {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
