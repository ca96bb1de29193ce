//! Error taxonomy shared by every capability and surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while parsing names, versions, contracts, or configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Capability name does not follow the `domain.verb_object` convention
    #[error("Invalid capability name '{name}': {reason}")]
    InvalidName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Contract document is malformed
    #[error("Invalid contract: {reason}")]
    InvalidContract {
        /// Why the contract was rejected
        reason: String,
    },

    /// Version string is not semver
    #[error("Invalid version: {reason}")]
    InvalidVersion {
        /// Why the version was rejected
        reason: String,
    },

    /// Configuration value could not be parsed
    #[error("Invalid configuration for {key}: {reason}")]
    Config {
        /// Setting name
        key: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Filesystem error
    #[error("I/O error at {path}: {reason}")]
    Io {
        /// Path being accessed
        path: String,
        /// Underlying error message
        reason: String,
    },
}

/// Framework error codes, implicitly declared by every capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Input failed the input schema
    ValidationError,
    /// Result failed the output schema
    OutputValidationError,
    /// No capability with that name
    UnknownCapability,
    /// A required external binary or entry point is missing
    DependencyError,
    /// Generic implementation failure
    CapabilityError,
}

impl ErrorCode {
    /// All framework codes
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::ValidationError,
        ErrorCode::OutputValidationError,
        ErrorCode::UnknownCapability,
        ErrorCode::DependencyError,
        ErrorCode::CapabilityError,
    ];

    /// Wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::OutputValidationError => "output_validation_error",
            Self::UnknownCapability => "unknown_capability",
            Self::DependencyError => "dependency_error",
            Self::CapabilityError => "capability_error",
        }
    }

    /// Check whether a code belongs to the framework taxonomy
    #[must_use]
    pub fn is_framework(code: &str) -> bool {
        code.parse::<ErrorCode>().is_ok()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| CoreError::InvalidContract {
                reason: format!("not a framework error code: {s}"),
            })
    }
}

/// A typed capability error that knows its wire code
///
/// Each capability's error enum implements this so it can be collapsed into
/// a [`CapabilityError`] with `?`.
pub trait DomainError: std::error::Error {
    /// Error code, either a framework code or one declared in the contract
    fn code(&self) -> &'static str;
}

/// Error returned across the implementation boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CapabilityError {
    /// Wire error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CapabilityError {
    /// Create an error with an arbitrary code
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create an error with a framework code
    #[must_use]
    pub fn framework(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_str(), message)
    }

    /// Attach structured diagnostics
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Generic implementation failure
    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::framework(ErrorCode::CapabilityError, message)
    }

    /// Missing external dependency
    #[must_use]
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::framework(ErrorCode::DependencyError, message)
    }
}

impl DomainError for std::convert::Infallible {
    fn code(&self) -> &'static str {
        match *self {}
    }
}

impl<E: DomainError> From<E> for CapabilityError {
    fn from(err: E) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum SampleError {
        #[error("ssh not found in PATH")]
        Missing,
        #[error("connection refused")]
        Ssh,
    }

    impl DomainError for SampleError {
        fn code(&self) -> &'static str {
            match self {
                Self::Missing => ErrorCode::DependencyError.as_str(),
                Self::Ssh => "ssh_error",
            }
        }
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_is_framework() {
        assert!(ErrorCode::is_framework("validation_error"));
        assert!(ErrorCode::is_framework("dependency_error"));
        assert!(!ErrorCode::is_framework("ssh_error"));
    }

    #[test]
    fn test_domain_error_conversion() {
        let err: CapabilityError = SampleError::Ssh.into();
        assert_eq!(err.code, "ssh_error");
        assert_eq!(err.message, "connection refused");

        let err: CapabilityError = SampleError::Missing.into();
        assert_eq!(err.code, "dependency_error");
    }

    #[test]
    fn test_capability_error_serialization_skips_empty_details() {
        let err = CapabilityError::generic("boom");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"code": "capability_error", "message": "boom"}));
    }

    #[test]
    fn test_core_error_display() {
        let err = CoreError::Config {
            key: "TOOLBOX_PORT".to_string(),
            reason: "not a number".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration for TOOLBOX_PORT: not a number"
        );
    }
}
