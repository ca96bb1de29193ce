//! The uniform `{ok, result|error}` invocation envelope.

use crate::error::{CapabilityError, ErrorCode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Error half of a failed envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Wire error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Structured diagnostics, e.g. schema violations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<CapabilityError> for ErrorBody {
    fn from(err: CapabilityError) -> Self {
        Self {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}

/// One JSON Schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    /// Validator message
    pub message: String,
    /// JSON pointer into the validated instance
    pub instance_path: String,
    /// JSON pointer into the schema
    pub schema_path: String,
}

/// Result of one dispatch call
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{"ok": true, "result": ...}`
    Success {
        /// Output object, already validated against the output schema
        result: Value,
    },
    /// `{"ok": false, "error": {...}}`
    Failure {
        /// Error body
        error: ErrorBody,
    },
}

impl Envelope {
    /// Successful envelope
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self::Success { result }
    }

    /// Failed envelope with a framework code
    #[must_use]
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::from_error(CapabilityError::framework(code, message))
    }

    /// Failed envelope from an implementation-boundary error
    #[must_use]
    pub fn from_error(err: CapabilityError) -> Self {
        Self::Failure { error: err.into() }
    }

    /// Lookup miss for `name`
    #[must_use]
    pub fn unknown_capability(name: &str) -> Self {
        Self::failure(
            ErrorCode::UnknownCapability,
            format!("unknown capability: {name}"),
        )
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Result object, if successful
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success { result } => Some(result),
            Self::Failure { .. } => None,
        }
    }

    /// Error body, if failed
    #[must_use]
    pub fn error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// Error code, if failed
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error().map(|e| e.code.as_str())
    }

    /// Envelope as a JSON value
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success { result } => serde_json::json!({"ok": true, "result": result}),
            Self::Failure { error } => serde_json::json!({"ok": false, "error": error}),
        }
    }

    /// Envelope as pretty JSON
    #[must_use]
    pub fn to_json_pretty(&self) -> String {
        // Serializing a `Value` tree cannot fail.
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    ok: bool,
    // A present `null` result is `Some(Value::Null)`; only an absent key is `None`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Success { result } => WireEnvelope {
                ok: true,
                result: Some(result.clone()),
                error: None,
            },
            Self::Failure { error } => WireEnvelope {
                ok: false,
                result: None,
                error: Some(error.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireEnvelope::deserialize(deserializer)?;
        match (wire.ok, wire.result, wire.error) {
            (true, Some(result), None) => Ok(Self::Success { result }),
            (false, None, Some(error)) => Ok(Self::Failure { error }),
            (true, _, _) => Err(serde::de::Error::custom(
                "successful envelope needs a result and no error",
            )),
            (false, _, _) => Err(serde::de::Error::custom(
                "failed envelope needs an error and no result",
            )),
        }
    }
}
