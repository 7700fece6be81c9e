//! Daemon configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Daemon configuration, loaded from `config.toml` under the user's
/// config directory. Every section falls back to defaults when the
/// file or the key is absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "rocd=info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// State file path (optional, uses the default location if unset).
    pub path: Option<PathBuf>,
}

/// Load configuration from file or defaults.
pub fn load_config() -> Result<Config> {
    let config_path = config_path()?;

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read config file {config_path:?}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {config_path:?}"))?;
        Ok(config)
    } else {
        info!(?config_path, "config file not found, using defaults");
        Ok(Config::default())
    }
}

fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("org", "roc-streaming", "rocd")
        .context("could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}
