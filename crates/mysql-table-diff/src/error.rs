//! Error types for the diff library.

use thiserror::Error;

/// Main error type for diff operations.
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (missing env var, bad flag combination,
    /// unsupported primary-key column type, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error (either endpoint)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (log file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DiffError {
    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        DiffError::Config(message.into())
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI: configuration problems exit 2,
    /// runtime failures exit 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiffError::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;
