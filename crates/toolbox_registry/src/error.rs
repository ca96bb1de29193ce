//! Registry errors.

use std::path::PathBuf;
use toolbox_core::CoreError;

/// A schema document could not be compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Schema is not a JSON object
    #[error("Schema must be a JSON object")]
    NotAnObject,
    /// `$schema` names a draft the validator does not know
    #[error("Unsupported $schema: {uri}")]
    UnsupportedDraft {
        /// Declared meta-schema URI
        uri: String,
    },
    /// Compiler rejected the document
    #[error("Invalid schema: {reason}")]
    Invalid {
        /// Compiler message
        reason: String,
    },
}

/// Fatal discovery-time errors
///
/// Anything here means the plugin tree cannot be trusted and the process
/// should refuse to start.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Root directory is missing or unreadable
    #[error("Capabilities directory {path} is not readable: {reason}")]
    RootUnreadable {
        /// Root path
        path: PathBuf,
        /// Underlying error
        reason: String,
    },

    /// Contract failed to parse or check
    #[error("Invalid contract in {dir}: {reason}")]
    InvalidContract {
        /// Plugin directory
        dir: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// `plugin.json` failed to parse or disagrees with the contract
    #[error("Invalid plugin manifest in {dir}: {reason}")]
    InvalidManifest {
        /// Plugin directory
        dir: PathBuf,
        /// Why it was rejected
        reason: String,
    },

    /// Two plugins declare the same capability name
    #[error("Duplicate capability {name}: declared in {first} and {second}")]
    DuplicateCapability {
        /// Capability name
        name: String,
        /// Directory registered first, if known
        first: String,
        /// Directory registered second
        second: String,
    },
}

impl DiscoveryError {
    pub(crate) fn contract(dir: impl Into<PathBuf>, err: &CoreError) -> Self {
        let reason = match err {
            CoreError::InvalidContract { reason } => reason.clone(),
            other => other.to_string(),
        };
        Self::InvalidContract {
            dir: dir.into(),
            reason,
        }
    }
}
