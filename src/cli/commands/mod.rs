//! CLI command implementations

mod queue;
mod splitset;
mod validate;


use crate::cli::logging::init_tracing;
use crate::cli::LogLevel;
use crate::config::{load_config, Cli, Command, EnsayoConfig};
use crate::context::Context;

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    let log_level = LogLevel::from_flags(cli.quiet, cli.verbose);

    match cli.command {
        Command::Validate { path } => {
            init_tracing(log_level, Default::default());
            validate::run_validate(&path, log_level)
        }
        Command::Splitset { id, format } => {
            let ctx = open_context(cli.config.as_deref(), cli.store, log_level)?;
            splitset::run_splitset(&ctx, id, format)
        }
        Command::Queue(args) => {
            let ctx = open_context(cli.config.as_deref(), cli.store, log_level)?;
            queue::run_queue(&ctx, args)
        }
    }
}

/// Config file (or defaults) with `--store` applied on top.
fn resolve_config(config: Option<&std::path::Path>, store: Option<String>) -> Result<EnsayoConfig, String> {
    let mut resolved = match config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => EnsayoConfig::default(),
    };
    if let Some(store) = store {
        resolved.store_path = store;
    }
    if resolved.store_path == ":memory:" {
        return Err("No store given; pass --store <path> or a config with store_path".to_string());
    }
    Ok(resolved)
}

fn open_context(
    config: Option<&std::path::Path>,
    store: Option<String>,
    log_level: LogLevel,
) -> Result<Context, String> {
    let config = resolve_config(config, store)?;
    init_tracing(log_level, config.log_level);
    if !std::path::Path::new(&config.store_path).exists() {
        return Err(format!("Store not found: {}", config.store_path));
    }
    Context::from_config(config).map_err(|e| format!("Failed to open store: {e}"))
}

/// Truncate a string for table output
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}
