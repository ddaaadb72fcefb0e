use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::parallel::{DEFAULT_THREAD_NAME, ParallelExecutor, Parallelism};

/// Environment variable prefix, e.g. `FANMAP_WORKERS=4`
pub const ENV_PREFIX: &str = "FANMAP_";

/// Executor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Worker count (0 or negative = one per available CPU, re-read per call)
    pub workers: Parallelism,
    /// Output channel buffer (0 = rendezvous with the consumer)
    pub output_capacity: usize,
    /// Prefix for worker thread names
    pub thread_name: String,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            workers: Parallelism::AUTO,
            output_capacity: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ParallelConfig {
    /// Load defaults, then `fanmap.{toml,json,yaml,yml}` from the working
    /// directory, then `FANMAP_*` environment variables
    pub fn load() -> Result<Self> {
        let figment = Self::defaults()
            .merge(Toml::file("fanmap.toml"))
            .merge(Json::file("fanmap.json"))
            .merge(Yaml::file("fanmap.yaml"))
            .merge(Yaml::file("fanmap.yml"))
            .merge(Env::prefixed(ENV_PREFIX));

        Self::extract(figment)
    }

    /// Load defaults, then the given file, then `FANMAP_*` environment variables
    ///
    /// The file format is picked from the extension.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let figment = match extension.as_deref() {
            Some("toml") => Self::defaults().merge(Toml::file(path)),
            Some("json") => Self::defaults().merge(Json::file(path)),
            Some("yaml" | "yml") => Self::defaults().merge(Yaml::file(path)),
            _ => bail!("Unsupported config format: {}", path.display()),
        };

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Executor built from these settings
    pub fn executor(&self) -> ParallelExecutor {
        ParallelExecutor::new(self.workers)
            .with_output_capacity(self.output_capacity)
            .with_thread_name(self.thread_name.clone())
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Invalid parallel configuration")?;
        tracing::debug!(
            workers = %config.workers,
            output_capacity = config.output_capacity,
            thread_name = %config.thread_name,
            "Loaded parallel configuration"
        );
        Ok(config)
    }
}
