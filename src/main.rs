//! Ensayo CLI
//!
//! Inspect an experiment store written by the ensayo library.
//!
//! # Usage
//!
//! ```bash
//! # Check a config file
//! ensayo validate ensayo.yaml
//!
//! # Partition sizes of a splitset
//! ensayo --store ./ensayo.db splitset 1
//!
//! # Queue progress and metrics
//! ensayo --store ./ensayo.db queue status 2
//! ensayo --store ./ensayo.db queue metrics 2 --format json
//! ```

use clap::Parser;
use ensayo::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
