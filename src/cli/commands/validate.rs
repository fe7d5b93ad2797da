//! Validate command implementation

use crate::cli::logging::log;
use crate::cli::LogLevel;
use crate::config::{load_config, EnsayoConfig};
use std::path::Path;

/// Format the resolved configuration as indented lines
pub fn format_config_info(config: &EnsayoConfig) -> String {
    let mut lines = vec![
        format!("  Store: {}", config.store_path),
        format!("  Cache dir: {}", config.cache_dir.display()),
    ];
    match config.seed {
        Some(seed) => lines.push(format!("  Seed: {seed}")),
        None => lines.push("  Seed: entropy".to_string()),
    }
    lines.push(format!("  Default bin count: {}", config.default_bin_count));
    lines.push(format!("  Log level: {}", config.log_level.as_filter()));
    lines.join("\n")
}

pub fn run_validate(path: &Path, log_level: LogLevel) -> Result<(), String> {
    let config = load_config(path).map_err(|e| format!("Config validation failed: {e}"))?;
    log(log_level, &format!("✓ Configuration is valid: {}", path.display()));
    log(log_level, &format_config_info(&config));
    Ok(())
}
