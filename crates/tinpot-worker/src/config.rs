//! Worker configuration.
//!
//! Layered: defaults → optional `tinpot.toml` → environment
//! (`MQTT_BROKER`, `ACTIONS_DIR`) → CLI flags, highest last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration load error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Broker URL, `tcp://host:port`.
    pub broker_url: String,
    /// Directory scanned for action scripts.
    pub actions_dir: PathBuf,
    /// Enable debug logging.
    pub debug: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            actions_dir: PathBuf::from("./actions"),
            debug: false,
        }
    }
}

impl WorkerConfig {
    /// Loads the config file (when present) over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file is unreadable or
    /// invalid TOML.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let from_file: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            config.merge(&from_file);
        }
        config.apply_env_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merges `other` into `self`; only values differing from the
    /// defaults override.
    pub fn merge(&mut self, other: &Self) {
        let default = Self::default();
        if other.broker_url != default.broker_url {
            self.broker_url = other.broker_url.clone();
        }
        if other.actions_dir != default.actions_dir {
            self.actions_dir = other.actions_dir.clone();
        }
        if other.debug != default.debug {
            self.debug = other.debug;
        }
    }

    /// Applies environment overrides using `get` as the lookup.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("MQTT_BROKER") {
            self.broker_url = url;
        }
        if let Some(dir) = get("ACTIONS_DIR") {
            self.actions_dir = PathBuf::from(dir);
        }
    }
}
