//! Local CLI transcripts.

use super::{Session, SessionSource, truncate};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};

const TITLE_CHARS: usize = 100;

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();
    entries
}

fn records(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .collect()
}

fn str_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn kind(record: &Value) -> Option<&str> {
    record.get("type").and_then(Value::as_str)
}

/// First user prompt text, for titles
fn prompt_text(record: &Value) -> Option<String> {
    match record.get("message")?.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => blocks
            .iter()
            .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|b| b.get("text").and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn summarize(project: &str, path: &Path) -> Session {
    let session_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut session = Session::remote(SessionSource::Cli, session_id, "local".to_string());
    session.project = Some(project.to_string());
    let mut count = 0_u64;

    for record in records(path) {
        if let Some(ts) = str_field(&record, "timestamp") {
            if session.created_at.is_none() {
                session.created_at = Some(ts.clone());
            }
            session.updated_at = Some(ts);
        }
        let is_user = kind(&record) == Some("user");
        if is_user || kind(&record) == Some("assistant") {
            count += 1;
        }
        if is_user && session.branch.is_none() {
            session.branch = str_field(&record, "gitBranch");
            session.slug = str_field(&record, "slug");
            session.cwd = str_field(&record, "cwd");
            session.version = str_field(&record, "version");
        }
        if is_user && session.title.is_none() {
            session.title = prompt_text(&record).map(|t| t.chars().take(TITLE_CHARS).collect());
        }
    }

    session.message_count = Some(count);
    let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    session.size_mb = Some((bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0);
    session
}

/// Every `<projects>/<project>/<id>.jsonl`, sorted by project then id
#[must_use]
pub fn cli_sessions(projects: &Path) -> Vec<Session> {
    sorted_entries(projects)
        .into_iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            let project = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sorted_entries(&dir)
                .into_iter()
                .filter(|p| p.extension().is_some_and(|e| e == "jsonl") && p.is_file())
                .map(move |p| summarize(&project, &p))
        })
        .collect()
}

/// Messages and metadata of one CLI transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Simplified messages in file order
    pub messages: Vec<Value>,
    /// `branch`, `cwd`, `version` from the first user record carrying a branch
    pub metadata: Map<String, Value>,
}

fn joined_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .map(|b| b.get("text").and_then(Value::as_str).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(super) fn tool_use(block: &Value) -> Value {
    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
    json!({
        "tool": block.get("name"),
        "id": block.get("id"),
        "input_preview": truncate(&input.to_string(), 200),
    })
}

pub(super) fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Read a transcript for export
///
/// # Errors
///
/// Returns error if the file cannot be read
pub fn cli_transcript(path: &Path) -> std::io::Result<Transcript> {
    let text = std::fs::read_to_string(path)?;
    let mut messages = Vec::new();
    let mut metadata = Map::new();

    for record in text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
    {
        let message = record.get("message");
        match kind(&record) {
            Some("user") => {
                let has_branch = metadata.get("branch").is_some_and(|b| !b.is_null() && b != "");
                if !has_branch {
                    for (key, field) in [("branch", "gitBranch"), ("cwd", "cwd"), ("version", "version")] {
                        metadata.insert(key.to_string(), record.get(field).cloned().unwrap_or(Value::Null));
                    }
                }
                let text = match message.and_then(|m| m.get("content")) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Array(blocks)) => joined_text(blocks),
                    _ => String::new(),
                };
                messages.push(json!({
                    "role": "user",
                    "text": text,
                    "timestamp": record.get("timestamp"),
                    "id": record.get("uuid"),
                }));
            }
            Some("assistant") => {
                let blocks: &[Value] = message
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .map_or(&[], Vec::as_slice);
                let mut tool_uses = Vec::new();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("tool_use") => tool_uses.push(tool_use(block)),
                        Some("tool_result") => messages.push(json!({
                            "role": "tool_result",
                            "tool_use_id": block.get("tool_use_id"),
                            "output_preview": truncate(&text_of(block.get("content")), 500),
                            "is_error": block.get("is_error").cloned().unwrap_or(Value::Bool(false)),
                            "timestamp": record.get("timestamp"),
                        })),
                        _ => {}
                    }
                }
                messages.push(json!({
                    "role": "assistant",
                    "text": joined_text(blocks),
                    "tool_uses": if tool_uses.is_empty() { Value::Null } else { Value::Array(tool_uses) },
                    "timestamp": record.get("timestamp"),
                    "id": record.get("uuid"),
                }));
            }
            _ => {}
        }
    }
    Ok(Transcript { messages, metadata })
}
