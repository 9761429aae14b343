use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use super::strategy::StrategyConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read strategy config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse strategy config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("strategy config rejected: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Loads and caches the strategy configuration. Owned by the caller and
/// passed in explicitly; a failed reload falls back to the last validated
/// config so a scheduled run keeps going on known-good rules.
pub struct StrategyConfigLoader {
    path: PathBuf,
    cached: Option<StrategyConfig>,
}

impl StrategyConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: None,
        }
    }

    /// Validate-then-cache. The cache is only ever written after validation
    /// passes, so `cached` always holds a usable config.
    pub fn load(&mut self) -> Result<&StrategyConfig, ConfigError> {
        match Self::read_and_validate(&self.path) {
            Ok(config) => {
                info!("Strategy config loaded from {}", self.path.display());
                self.cached = Some(config);
                Ok(self.cached.as_ref().unwrap())
            }
            Err(e) => {
                if let Some(cached) = self.cached.as_ref() {
                    warn!(
                        "Strategy config reload failed ({}); using last-known-good config",
                        e
                    );
                    Ok(cached)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Drop the cache so the next `load` must re-read the file.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn cached(&self) -> Option<&StrategyConfig> {
        self.cached.as_ref()
    }

    fn read_and_validate(path: &Path) -> Result<StrategyConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StrategyConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
