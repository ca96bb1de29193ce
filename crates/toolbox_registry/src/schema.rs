//! Compiled JSON Schemas for capability input and output.

use crate::error::SchemaError;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::fmt;
use toolbox_core::SchemaViolation;

/// A schema compiled once at discovery and reused for every call
pub struct CompiledSchema {
    raw: Value,
    validator: Validator,
}

impl CompiledSchema {
    /// Compile a schema document
    ///
    /// The draft is taken from `$schema`; draft-07 is assumed when absent.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not an object, names an unknown
    /// draft, or is not a valid schema for its draft
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        if !schema.is_object() {
            return Err(SchemaError::NotAnObject);
        }
        let draft = draft_for(schema)?;
        let validator = jsonschema::options()
            .with_draft(draft)
            .build(schema)
            .map_err(|e| SchemaError::Invalid {
                reason: e.to_string(),
            })?;

        Ok(Self {
            raw: schema.clone(),
            validator,
        })
    }

    /// Source document
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Check an instance without collecting diagnostics
    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validate an instance
    ///
    /// # Errors
    ///
    /// Returns every violation, sorted by instance path
    pub fn validate(&self, instance: &Value) -> Result<(), Vec<SchemaViolation>> {
        let mut violations: Vec<SchemaViolation> = self
            .validator
            .iter_errors(instance)
            .map(|error| SchemaViolation {
                message: error.to_string(),
                instance_path: error.instance_path.to_string(),
                schema_path: error.schema_path.to_string(),
            })
            .collect();

        if violations.is_empty() {
            return Ok(());
        }
        violations.sort_by(|a, b| {
            a.instance_path
                .cmp(&b.instance_path)
                .then_with(|| a.schema_path.cmp(&b.schema_path))
        });
        Err(violations)
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

fn draft_for(schema: &Value) -> Result<Draft, SchemaError> {
    let Some(uri) = schema.get("$schema").and_then(Value::as_str) else {
        return Ok(Draft::Draft7);
    };
    let normalized = uri
        .trim_end_matches('#')
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    match normalized {
        "json-schema.org/draft-04/schema" => Ok(Draft::Draft4),
        "json-schema.org/draft-06/schema" => Ok(Draft::Draft6),
        "json-schema.org/draft-07/schema" => Ok(Draft::Draft7),
        "json-schema.org/draft/2019-09/schema" => Ok(Draft::Draft201909),
        "json-schema.org/draft/2020-12/schema" => Ok(Draft::Draft202012),
        _ => Err(SchemaError::UnsupportedDraft {
            uri: uri.to_string(),
        }),
    }
}

/// Summarize violations in one line for an error message
#[must_use]
pub fn summarize(violations: &[SchemaViolation]) -> String {
    match violations {
        [] => "no violations".to_string(),
        [only] => describe(only),
        [first, rest @ ..] => format!("{} (and {} more)", describe(first), rest.len()),
    }
}

fn describe(violation: &SchemaViolation) -> String {
    if violation.instance_path.is_empty() {
        violation.message.clone()
    } else {
        format!("{}: {}", violation.instance_path, violation.message)
    }
}
