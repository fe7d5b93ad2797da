//! Process configuration loaded from YAML.
//!
//! ```yaml
//! store_path: ./ensayo.db
//! cache_dir: ./.ensayo-cache
//! seed: 42
//! default_bin_count: 3
//! log_level: info
//! ```

mod args;

pub use args::{Cli, Command, OutputFormat, QueueArgs, QueueCommand};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Bin count used when a continuous stratification vector has none.
pub const DEFAULT_BIN_COUNT: usize = 3;

/// Runtime configuration for a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsayoConfig {
    /// SQLite file holding every persisted entity (`:memory:` allowed)
    pub store_path: String,

    /// Directory for staged-tensor cache artifacts
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Seed for the random source; entropy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Bins for continuous stratification when a split names none
    #[serde(default = "default_bin_count")]
    pub default_bin_count: usize,

    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("ensayo-cache")
}

fn default_bin_count() -> usize {
    DEFAULT_BIN_COUNT
}

impl Default for EnsayoConfig {
    fn default() -> Self {
        Self {
            store_path: ":memory:".to_string(),
            cache_dir: default_cache_dir(),
            seed: None,
            default_bin_count: DEFAULT_BIN_COUNT,
            log_level: LogLevel::default(),
        }
    }
}

impl EnsayoConfig {
    /// In-memory store with a fixed seed; the usual setup for tests.
    pub fn in_memory(seed: u64) -> Self {
        Self { seed: Some(seed), ..Self::default() }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}

/// Log verbosity, mapped onto a `tracing` filter by the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Validate a configuration after parsing.
pub fn validate_config(config: &EnsayoConfig) -> Result<()> {
    if config.store_path.trim().is_empty() {
        return Err(Error::config("store_path cannot be empty"));
    }
    if config.default_bin_count < 2 {
        return Err(Error::config(format!(
            "default_bin_count: {} (must be >= 2)",
            config.default_bin_count
        )));
    }
    Ok(())
}

/// Load and validate a YAML configuration file.
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<EnsayoConfig> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::config(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;

    let config: EnsayoConfig = serde_yaml::from_str(&yaml_content)
        .map_err(|e| Error::config(format!("Failed to parse YAML config: {e}")))?;

    validate_config(&config)?;

    Ok(config)
}
