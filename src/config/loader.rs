use super::{get_config_dir, Config};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Load from `path` if given, otherwise from the user config directory.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Read the config file (if any), apply environment overrides and
    /// validate the result.
    pub async fn load(&self) -> Result<Config> {
        let mut config = match &self.path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Self::read_file(path).await?
            }
            None => match get_config_dir().map(|dir| dir.join("config.toml")) {
                Some(path) if path.exists() => Self::read_file(&path).await?,
                _ => Config::new(),
            },
        };

        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> Result<Config> {
        debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }
}
