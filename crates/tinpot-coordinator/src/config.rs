//! Coordinator configuration.
//!
//! Layered: defaults → optional `tinpot.toml` → environment
//! (`MQTT_BROKER`, `PORT`, `ROOT_PATH`, `SYNC_TIMEOUT_SECS`) → CLI
//! flags, highest last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
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

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Broker URL, `tcp://host:port`.
    pub broker_url: String,
    /// HTTP listen port.
    pub port: u16,
    /// Path prefix for generated URLs when served behind a subpath.
    pub root_path: String,
    /// Deadline for `sync_execute` responses, in seconds.
    pub sync_timeout_secs: u64,
    /// Enable debug logging.
    pub debug: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            port: 8000,
            root_path: String::new(),
            sync_timeout_secs: 30,
            debug: false,
        }
    }
}

impl CoordinatorConfig {
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
        if other.port != default.port {
            self.port = other.port;
        }
        if other.root_path != default.root_path {
            self.root_path = other.root_path.clone();
        }
        if other.sync_timeout_secs != default.sync_timeout_secs {
            self.sync_timeout_secs = other.sync_timeout_secs;
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
        if let Some(port) = get("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
        if let Some(root) = get("ROOT_PATH") {
            self.root_path = root;
        }
        if let Some(secs) = get("SYNC_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.sync_timeout_secs = secs;
        }
    }

    /// Returns the sync-execute deadline as a [`Duration`].
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.broker_url, "tcp://localhost:1883");
        assert_eq!(config.port, 8000);
        assert!(config.root_path.is_empty());
        assert_eq!(config.sync_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CoordinatorConfig::default();
        config.apply_env_from(|key| match key {
            "MQTT_BROKER" => Some("tcp://env:1883".to_string()),
            "PORT" => Some("9000".to_string()),
            "ROOT_PATH" => Some("/tinpot".to_string()),
            "SYNC_TIMEOUT_SECS" => Some("5".to_string()),
            _ => None,
        });
        assert_eq!(config.broker_url, "tcp://env:1883");
        assert_eq!(config.port, 9000);
        assert_eq!(config.root_path, "/tinpot");
        assert_eq!(config.sync_timeout_secs, 5);
    }

    #[test]
    fn unparseable_env_port_is_ignored() {
        let mut config = CoordinatorConfig::default();
        config.apply_env_from(|key| (key == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn merge_only_overrides_non_default_values() {
        let mut base = CoordinatorConfig {
            port: 8080,
            ..CoordinatorConfig::default()
        };
        let incoming = CoordinatorConfig {
            root_path: "/sub".to_string(),
            ..CoordinatorConfig::default()
        };
        base.merge(&incoming);
        assert_eq!(base.port, 8080);
        assert_eq!(base.root_path, "/sub");
    }

    #[test]
    fn config_file_parses_and_merges() {
        let from_file: CoordinatorConfig =
            toml::from_str("port = 8888\nsync_timeout_secs = 10\n").expect("parse");
        let mut config = CoordinatorConfig::default();
        config.merge(&from_file);

        assert_eq!(config.port, 8888);
        assert_eq!(config.sync_timeout_secs, 10);
        assert_eq!(config.broker_url, "tcp://localhost:1883");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(CoordinatorConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
