//! Tracing subscriber setup for the binary.

use crate::config::LogLevel as ConfigLevel;
use tracing_subscriber::EnvFilter;

/// Console verbosity picked with `--verbose` / `--quiet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Errors only
    Quiet,
    /// The configured level
    Normal,
    /// Debug output from ensayo
    Verbose,
}

impl LogLevel {
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }

    /// Filter directive for this verbosity given the configured level.
    pub fn directive(&self, configured: ConfigLevel) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => configured.as_filter(),
            Self::Verbose => "ensayo=debug",
        }
    }
}

/// Install the global subscriber; `RUST_LOG` wins over the flags.
pub fn init_tracing(level: LogLevel, configured: ConfigLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive(configured)));
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Print a line unless output is quiet.
pub fn log(level: LogLevel, msg: &str) {
    if level != LogLevel::Quiet {
        println!("{msg}");
    }
}
