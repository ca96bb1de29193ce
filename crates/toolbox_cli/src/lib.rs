//! Toolbox CLI
//!
//! Command implementations behind the `toolbox` binary: dispatch, listing,
//! description, OpenAI tool generation, Claude skill generation and the
//! OpenAI tool-calling runner.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod openai;
pub mod skillgen;
pub mod toolgen;

pub use error::{CliError, CliResult};

use serde_json::{Value, json};
use std::path::Path;
use toolbox_core::{Envelope, ErrorCode};
use toolbox_registry::{Dispatcher, Registry, Surface};

/// Capability summaries sorted by name
#[must_use]
pub fn list_capabilities(registry: &Registry) -> Value {
    Value::Array(
        registry
            .contracts()
            .map(|contract| {
                json!({
                    "name": contract.name.as_str(),
                    "version": contract.version.to_string(),
                    "description": contract.description,
                })
            })
            .collect(),
    )
}

/// Pretty contract JSON for `name`
///
/// # Errors
///
/// Returns error if the capability is not registered
pub fn describe_capability(registry: &Registry, name: &str) -> CliResult<String> {
    let record = registry
        .get(name)
        .ok_or_else(|| CliError::UnknownCapability(name.to_string()))?;
    let mut text = serde_json::to_string_pretty(record.contract())?;
    text.push('\n');
    Ok(text)
}

/// Raw input from `--input-json` or `--input-file`
///
/// # Errors
///
/// Returns error if the file cannot be read
pub fn read_input(json: Option<String>, file: Option<&Path>) -> CliResult<String> {
    match (json, file) {
        (Some(json), _) => Ok(json),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| CliError::io(path, e)),
        (None, None) => Ok("{}".to_string()),
    }
}

/// Dispatch from the command line
///
/// Capabilities not exposed on the CLI surface report `unknown_capability`.
#[must_use]
pub fn dispatch_cli(dispatcher: &Dispatcher, name: &str, input: &str) -> Envelope {
    match dispatcher.registry().get(name) {
        Some(record) if record.exposes(Surface::Cli) => dispatcher.invoke_json(name, input),
        _ => Envelope::unknown_capability(name),
    }
}

/// Read the input flags and dispatch
///
/// An unreadable `--input-file` is reported as a `validation_error` envelope
/// like any other bad input.
#[must_use]
pub fn dispatch_with_input(
    dispatcher: &Dispatcher,
    name: &str,
    json: Option<String>,
    file: Option<&Path>,
) -> Envelope {
    match read_input(json, file) {
        Ok(raw) => dispatch_cli(dispatcher, name, &raw),
        Err(err) => Envelope::failure(ErrorCode::ValidationError, format!("cannot read input: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolgen::tests::{plugin_tree, registry};
    use std::sync::Arc;

    #[test]
    fn test_list_sorted() {
        let root = plugin_tree();
        let listed = list_capabilities(&registry(root.path()));
        assert_eq!(
            listed,
            json!([
                {"name": "ops.restart", "version": "2.1.0", "description": "Restart"},
                {"name": "text.upper", "version": "1.0.0", "description": "Uppercase text"}
            ])
        );
    }

    #[test]
    fn test_describe() {
        let root = plugin_tree();
        let registry = registry(root.path());
        let text = describe_capability(&registry, "text.upper").unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["name"], "text.upper");
        assert!(matches!(
            describe_capability(&registry, "text.lower"),
            Err(CliError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_dispatch_cli() {
        let root = plugin_tree();
        let dispatcher = Dispatcher::new(Arc::new(registry(root.path())));

        let ok = dispatch_cli(&dispatcher, "text.upper", r#"{"text": "abc"}"#);
        assert_eq!(ok.result().unwrap()["text"], "ABC");

        let bad = dispatch_cli(&dispatcher, "text.upper", "{");
        assert_eq!(bad.error_code(), Some("validation_error"));

        let missing = dispatch_cli(&dispatcher, "text.lower", "{}");
        assert_eq!(missing.error_code(), Some("unknown_capability"));
    }

    #[test]
    fn test_unreadable_input_file_is_validation_envelope() {
        let root = plugin_tree();
        let dispatcher = Dispatcher::new(Arc::new(registry(root.path())));
        let missing = root.path().join("missing.json");

        let envelope = dispatch_with_input(&dispatcher, "text.upper", None, Some(&missing));
        assert_eq!(envelope.error_code(), Some("validation_error"));
        assert!(envelope.error().unwrap().message.contains("missing.json"));

        let input = root.path().join("input.json");
        std::fs::write(&input, r#"{"text": "ok"}"#).unwrap();
        let envelope = dispatch_with_input(&dispatcher, "text.upper", None, Some(&input));
        assert_eq!(envelope.result().unwrap()["text"], "OK");
    }

    #[test]
    fn test_read_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"text": "x"}"#).unwrap();
        assert_eq!(read_input(None, Some(&path)).unwrap(), r#"{"text": "x"}"#);
        assert_eq!(read_input(Some("{}".to_string()), None).unwrap(), "{}");
        assert!(read_input(None, Some(&dir.path().join("missing.json"))).is_err());
    }
}
