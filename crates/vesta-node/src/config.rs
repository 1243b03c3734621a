//! Node configuration for the Vesta scenario node.
//!
//! Provides [`NodeConfig`] with defaults for the data directory and logging.
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `VESTA_*` environment variables. Command-line flags are applied on top by
//! the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `VESTA_LOG_LEVEL=debug`.
pub const ENV_PREFIX: &str = "VESTA";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

/// Configuration for a node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "vesta_escrow=trace").
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Version tag recorded by new escrow deployments.
    pub version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vesta");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            version: "v1".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `file` if it exists, then `VESTA_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(file, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let defaults = NodeConfig::default();
        let mut builder = Config::builder()
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .set_default("log_level", defaults.log_level)?
            .set_default("log_format", defaults.log_format.to_string())?
            .set_default("version", defaults.version)?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder.add_source(env).build()?.try_deserialize()
    }

    /// Path to the RocksDB state directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("state")
    }
}
