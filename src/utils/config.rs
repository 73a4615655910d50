// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: an optional TOML/YAML/JSON file (path
//! from `REPLAYCDN_CONFIG`, default `replaycdn.toml`) overridden by
//! environment variables such as `REPLAYCDN_SERVER__PORT=9090`.

use crate::observability::LogFormat;
use crate::replay::ShutdownPolicy;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "REPLAYCDN_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "replaycdn.toml";

/// Prefix of environment overrides (`REPLAYCDN_SECTION__KEY`)
pub const ENV_PREFIX: &str = "REPLAYCDN";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub replay: ReplayConfig,
    pub modifiers: ModifiersConfig,
    pub control: ControlConfig,
    pub observability: ObservabilityConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Replay settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Archive file to serve responses from
    pub archive_path: PathBuf,

    /// Comma-separated list of script files injected into HTML responses
    pub inject_scripts: String,
}

/// Modifier document settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifiersConfig {
    /// JSON modifier document; no document means no-op modifiers
    pub config_path: Option<PathBuf>,
}

/// Control-path settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Who may trigger the shutdown command
    pub shutdown: ShutdownPolicy,
}

/// Logging and metrics settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,

    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
}

impl EngineConfig {
    /// Load configuration from the file named by `REPLAYCDN_CONFIG` and the
    /// environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(path)
    }

    /// Load configuration from a specific file, still honouring environment
    /// overrides. A missing file falls back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with_env(path, ENV_PREFIX)
    }

    /// Load configuration from a file, overridden by variables of the form
    /// `<env_prefix>_SECTION__KEY`
    pub fn from_file_with_env(path: impl AsRef<Path>, env_prefix: &str) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the engine cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.replay.archive_path.as_os_str().is_empty() {
            return Err(EngineError::Config(
                "replay.archive_path must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(EngineError::Config("server.port must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Listener address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| EngineError::Config(format!("invalid server address: {}", e)))
    }
}
