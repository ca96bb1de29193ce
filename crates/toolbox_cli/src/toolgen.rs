//! OpenAI tool definitions generated from contracts.

use crate::error::{CliError, CliResult};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use toolbox_registry::{CapabilityRecord, Registry, Surface};

/// Adapter directory inside a plugin
pub const ADAPTER_DIR: &str = "adapters";

/// Generated file name inside [`ADAPTER_DIR`]
pub const ADAPTER_FILE: &str = "openai.json";

/// `{"type": "function", "function": {...}}` for one capability
#[must_use]
pub fn openai_tool(record: &CapabilityRecord) -> Value {
    let contract = record.contract();
    let mut parameters = contract.input_schema.clone();
    if let Some(object) = parameters.as_object_mut() {
        object.shift_remove("$schema");
    }
    json!({
        "type": "function",
        "function": {
            "name": contract.name.tool_name(),
            "description": contract.description,
            "parameters": parameters,
        }
    })
}

/// Tool definitions for every OpenAI-enabled capability, in name order
#[must_use]
pub fn openai_tools(registry: &Registry) -> Vec<Value> {
    registry.for_surface(Surface::Openai).map(openai_tool).collect()
}

/// Recursively sort object keys
#[must_use]
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Pretty JSON with sorted keys and a trailing newline
///
/// # Errors
///
/// Returns error if serialization fails
pub fn render(value: Value) -> CliResult<String> {
    let mut text = serde_json::to_string_pretty(&sort_keys(value))?;
    text.push('\n');
    Ok(text)
}

fn write(path: &Path, text: &str) -> CliResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CliError::io(parent, e))?;
    }
    std::fs::write(path, text).map_err(|e| CliError::io(path, e))
}

/// Write one file per OpenAI-enabled capability
///
/// With `out_dir` files are named `<tool name>.json`; otherwise each lands in
/// its plugin's `adapters/openai.json`. Capabilities registered without a
/// plugin directory are skipped in that mode.
///
/// # Errors
///
/// Returns error if a file cannot be written
pub fn write_tools(registry: &Registry, out_dir: Option<&Path>) -> CliResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for record in registry.for_surface(Surface::Openai) {
        let path = match (out_dir, record.dir()) {
            (Some(out), _) => out.join(format!("{}.json", record.contract().name.tool_name())),
            (None, Some(dir)) => dir.join(ADAPTER_DIR).join(ADAPTER_FILE),
            (None, None) => {
                tracing::warn!(capability = record.name(), "no plugin directory, skipping");
                continue;
            }
        };
        write(&path, &render(openai_tool(record))?)?;
        tracing::debug!(path = %path.display(), "wrote tool definition");
        written.push(path);
    }
    Ok(written)
}
