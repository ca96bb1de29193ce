//! CLI errors.

use std::path::Path;
use thiserror::Error;

/// Result alias
pub type CliResult<T> = Result<T, CliError>;

/// Errors raised by CLI commands
#[derive(Debug, Error)]
pub enum CliError {
    /// Filesystem failure
    #[error("{path}: {source}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Capability is not registered
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    /// Required setting is missing
    #[error("{0} is not set")]
    MissingSetting(&'static str),
    /// Chat completion request failed
    #[error("OpenAI request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Chat completion API returned an error status
    #[error("OpenAI API returned {status}: {body}")]
    Api {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },
    /// Response did not have the expected shape
    #[error("unexpected OpenAI response: {0}")]
    BadResponse(String),
    /// No final answer within the turn limit
    #[error("no final answer after {0} turns")]
    TurnLimit(usize),
}

impl CliError {
    /// Wrap an I/O error with its path
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
