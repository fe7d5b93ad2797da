//! Command-line arguments for the `ensayo` binary.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ensayo: reproducible experiment splits, pipelines and job queues
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "ensayo")]
#[command(version)]
#[command(about = "Inspect splits, queues and metrics in an ensayo experiment store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the SQLite store (overrides the config file)
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate a configuration file
    Validate {
        /// Config to check
        path: PathBuf,
    },

    /// Show a splitset's partition sizes
    Splitset {
        id: i64,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Queue progress and metrics
    Queue(QueueArgs),
}

#[derive(Parser, Debug, Clone, PartialEq)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum QueueCommand {
    /// Completed vs. total runs and per-job status
    Status { id: i64 },
    /// One row per predictor, partition and metric
    Metrics { id: i64 },
    /// Aggregate statistics per predictor and metric
    Aggregate { id: i64 },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
