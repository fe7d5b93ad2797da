//! CLI module for ensayo
//!
//! Read-only inspection of an experiment store: configuration checks,
//! splitset partitions, queue progress and metric tables.

mod commands;
mod logging;

pub use commands::run_command;
pub use logging::{init_tracing, LogLevel};

// Re-export Cli from config for convenience
pub use crate::config::Cli;
