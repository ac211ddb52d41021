use crate::client::DEFAULT_ENDPOINT;
use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod loader;


pub use loader::ConfigLoader;

/// Largest batch the bulk match endpoint accepts.
pub const MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// Directory used for history and output files when none is configured.
pub fn get_data_dir() -> PathBuf {
    ProjectDirs::from("com", "enrich", "enrich")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".enrich"))
}

/// Directory searched for `config.toml` when no explicit path is given.
pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "enrich", "enrich").map(|dirs| dirs.config_dir().to_path_buf())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub batch: BatchConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Pacing of calls to the enrichment API. Applies to every job alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_BATCH_DELAY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            output_dir: None,
            history_file: None,
        }
    }
}

impl StorageConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("outputs"))
    }

    pub fn history_file(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("history.jsonl"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Apply `ENRICH_*` overrides read through `lookup`.
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("ENRICH_API_KEY") {
            self.api.api_key = Some(api_key);
        }

        if let Some(endpoint) = lookup("ENRICH_API_ENDPOINT") {
            self.api.endpoint = endpoint;
        }

        if let Some(data_dir) = lookup("ENRICH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Some(size) = lookup("ENRICH_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(value) => self.batch.size = value,
                Err(_) => tracing::warn!("Ignoring invalid ENRICH_BATCH_SIZE: {}", size),
            }
        }

        if let Some(delay) = lookup("ENRICH_BATCH_DELAY") {
            match humantime_serde::re::humantime::parse_duration(&delay) {
                Ok(value) => self.batch.delay = value,
                Err(_) => tracing::warn!("Ignoring invalid ENRICH_BATCH_DELAY: {}", delay),
            }
        }

        if let Some(bind) = lookup("ENRICH_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.size == 0 || self.batch.size > MAX_BATCH_SIZE {
            return Err(Error::Config(format!(
                "batch.size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch.size
            )));
        }

        url::Url::parse(&self.api.endpoint).map_err(|e| {
            Error::Config(format!("api.endpoint is not a valid URL ({}): {}", e, self.api.endpoint))
        })?;

        if self.api.request_timeout.is_zero() {
            return Err(Error::Config("api.request_timeout must be positive".to_string()));
        }

        Ok(())
    }
}
