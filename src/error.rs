//! Error types with actionable diagnostics.
//!
//! Configuration problems surface before any expensive work starts, so every
//! configuration variant carries enough context to fix the call site.

use thiserror::Error;

/// Result type alias for ensayo operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the experiment engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid split sizes, column-filter conflicts, unsupported dtype or
    /// encoder combinations and similar construction-time mistakes.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An encoder or interpolater failed its pre-flight fit/transform check.
    #[error("Self-test failed for {link}: {message}\n  → Check that the transform accepts the selected columns")]
    SelfTest { link: String, message: String },

    /// A user callable produced nothing.
    #[error("`{callable}` returned nothing\n  → Every model callable must return a value")]
    NullReturn { callable: &'static str },

    /// A user callable failed while running.
    #[error("`{callable}` failed: {message}")]
    Callable { callable: &'static str, message: String },

    /// Another run already produced a Predictor for this unit.
    #[error("Predictor already exists for queue {queue}, job {job}, repeat {repeat_index}\n  → Another process completed this unit")]
    DuplicateRun { queue: i64, job: i64, repeat_index: usize },

    /// Entity lookup failed.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Array shape mismatch.
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Configuration errors are raised synchronously at construction time.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::SelfTest { .. } | Self::NullReturn { .. })
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "E001",
            Self::SelfTest { .. } => "E002",
            Self::NullReturn { .. } => "E003",
            Self::Callable { .. } => "E010",
            Self::DuplicateRun { .. } => "E020",
            Self::NotFound { .. } => "E030",
            Self::Shape(_) => "E040",
            Self::Store(_) => "E050",
            Self::Io { .. } => "E051",
            Self::Serialization(_) => "E052",
            Self::Internal(_) => "E999",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e.to_string())
    }
}
