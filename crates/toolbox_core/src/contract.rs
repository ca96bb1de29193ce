//! Capability contracts (`contract.v1.json`).
//!
//! The contract is the only durable, versioned artifact in the system. Every
//! surface is generated from or validated against it.

use crate::error::{CoreError, CoreResult, ErrorCode};
use crate::name::CapabilityName;
use crate::version::Version;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// File name of a contract inside a plugin directory
pub const CONTRACT_FILE: &str = "contract.v1.json";

/// A declared error code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSpec {
    /// Wire code, snake_case
    pub code: String,
    /// When the code is raised
    #[serde(default)]
    pub description: String,
}

impl ErrorSpec {
    /// Create a new error spec
    #[must_use]
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

/// Capability descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Unique dotted name
    pub name: CapabilityName,
    /// What the capability does
    #[serde(default)]
    pub description: String,
    /// Contract version
    #[serde(default)]
    pub version: Version,
    /// JSON Schema for the input object
    pub input_schema: Value,
    /// JSON Schema for the result object
    pub output_schema: Value,
    /// Ordered set of domain error codes
    #[serde(default)]
    pub errors: Vec<ErrorSpec>,
    /// Free-text side-effect note
    #[serde(default)]
    pub side_effects: String,
    /// Fields this crate does not interpret, kept for lossless round-trips
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Contract {
    /// Create a contract with empty object schemas
    #[must_use]
    pub fn new(name: CapabilityName) -> Self {
        Self {
            name,
            description: String::new(),
            version: Version::default(),
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: serde_json::json!({"type": "object"}),
            errors: Vec::new(),
            side_effects: String::new(),
            extra: IndexMap::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the input schema
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    /// Declare an error code
    #[must_use]
    pub fn with_error(mut self, code: impl Into<String>, description: impl Into<String>) -> Self {
        self.errors.push(ErrorSpec::new(code, description));
        self
    }

    /// Parse and check a contract document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed, a required field is missing,
    /// or the declared shape is inconsistent
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let contract: Contract =
            serde_json::from_str(text).map_err(|e| CoreError::InvalidContract {
                reason: e.to_string(),
            })?;
        contract.check_shape()?;
        Ok(contract)
    }

    /// Load a contract from disk
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid contract
    pub fn from_path(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&text).map_err(|err| match err {
            CoreError::InvalidContract { reason } => CoreError::InvalidContract {
                reason: format!("{}: {reason}", path.display()),
            },
            other => other,
        })
    }

    /// Serialize as pretty JSON with a trailing newline
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_pretty(&self) -> CoreResult<String> {
        let mut text =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::InvalidContract {
                reason: e.to_string(),
            })?;
        text.push('\n');
        Ok(text)
    }

    /// Structural checks that do not need a schema compiler
    ///
    /// # Errors
    ///
    /// Returns error on a non-object schema or a duplicate/malformed code
    pub fn check_shape(&self) -> CoreResult<()> {
        for (field, schema) in [
            ("input_schema", &self.input_schema),
            ("output_schema", &self.output_schema),
        ] {
            if !schema.is_object() {
                return Err(CoreError::InvalidContract {
                    reason: format!("{}: {field} must be a JSON object", self.name),
                });
            }
        }

        let mut seen = HashSet::new();
        for spec in &self.errors {
            if !is_snake_case(&spec.code) {
                return Err(CoreError::InvalidContract {
                    reason: format!("{}: error code '{}' is not snake_case", self.name, spec.code),
                });
            }
            if !seen.insert(spec.code.as_str()) {
                return Err(CoreError::InvalidContract {
                    reason: format!("{}: duplicate error code '{}'", self.name, spec.code),
                });
            }
        }
        Ok(())
    }

    /// Check whether a code may be surfaced by this capability
    #[must_use]
    pub fn declares(&self, code: &str) -> bool {
        ErrorCode::is_framework(code) || self.errors.iter().any(|spec| spec.code == code)
    }

    /// Declared domain codes in contract order
    pub fn error_codes(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|spec| spec.code.as_str())
    }
}

fn is_snake_case(code: &str) -> bool {
    let mut chars = code.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !code.ends_with('_')
}
