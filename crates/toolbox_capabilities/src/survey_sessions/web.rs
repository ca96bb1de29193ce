//! claude.ai sessions and chats over curl.
//!
//! Headers, cookie included, are fed to curl on stdin so they stay out of
//! the process list.

use super::local::{text_of, tool_use};
use super::{Session, SessionSource, truncate};
use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde_json::{Value, json};
use std::time::Duration;

const BASE_URL: &str = "https://claude.ai";
const USER_AGENT: &str = "session-survey/1.0";
const CODE_HEADERS: [(&str, &str); 4] = [
    ("anthropic-beta", "ccr-byoc-2025-07-29"),
    ("anthropic-client-feature", "ccr"),
    ("anthropic-client-platform", "web_claude_ai"),
    ("anthropic-version", "2023-06-01"),
];
const EVENT_PAGE_SIZE: usize = 1000;
const PAGE_DELAY: Duration = Duration::from_millis(200);

/// Request failures
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// curl could not be run
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Non-2xx or transport failure
    #[error("{0}")]
    Request(String),
    /// Body was not JSON
    #[error("invalid response from {url}: {message}")]
    Decode {
        /// Requested URL
        url: String,
        /// Parser message
        message: String,
    },
}

/// Authenticated claude.ai client
pub struct WebClient<'a> {
    runner: &'a dyn CommandRunner,
    org_id: &'a str,
    cookie: &'a str,
}

impl<'a> WebClient<'a> {
    /// Client for one organization
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, org_id: &'a str, cookie: &'a str) -> Self {
        Self { runner, org_id, cookie }
    }

    fn headers(&self, code_api: bool) -> String {
        let mut lines = vec![
            "content-type: application/json".to_string(),
            format!("Cookie: {}", self.cookie),
            format!("User-Agent: {USER_AGENT}"),
            format!("x-organization-uuid: {}", self.org_id),
        ];
        if code_api {
            lines.extend(CODE_HEADERS.iter().map(|(k, v)| format!("{k}: {v}")));
        }
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    fn get(&self, url: &str, code_api: bool) -> Result<Value, WebError> {
        let spec = CommandSpec::new("curl")
            .args(["-fsS", "--max-time", "30", "-H", "@-"])
            .arg(url)
            .stdin(self.headers(code_api));
        let output = process::run(self.runner, &spec)?;
        if !output.success() {
            return Err(WebError::Request(output.error_message("request failed")));
        }
        serde_json::from_str(&output.stdout).map_err(|e| WebError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Every event of a Code session, following the `last_id` cursor
    ///
    /// A failed page ends the walk with what was collected.
    #[must_use]
    pub fn session_events(&self, session_id: &str) -> Vec<Value> {
        let mut events: Vec<Value> = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut url = format!("{BASE_URL}/v1/sessions/{session_id}/events?limit={EVENT_PAGE_SIZE}");
            if let Some(cursor) = &cursor {
                url.push_str("&last_id=");
                url.push_str(cursor);
            }
            let page = match self.get(&url, true) {
                Ok(page) => page,
                Err(err) => {
                    tracing::debug!(session = session_id, error = %err, "event page failed");
                    break;
                }
            };
            let batch: Vec<Value> = page.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
            let has_more = page.get("has_more").and_then(Value::as_bool).unwrap_or(false);
            cursor = batch.last().and_then(|e| e.get("id")).and_then(Value::as_str).map(str::to_string);
            let empty = batch.is_empty();
            events.extend(batch);
            if !has_more || empty || cursor.is_none() {
                break;
            }
            std::thread::sleep(PAGE_DELAY);
        }
        events
    }

    /// One chat conversation
    ///
    /// # Errors
    ///
    /// Returns error if the request fails
    pub fn chat_conversation(&self, conversation_id: &str) -> Result<Chat, WebError> {
        let url = format!(
            "{BASE_URL}/api/organizations/{}/chat_conversations/{conversation_id}",
            self.org_id
        );
        let data = self.get(&url, false)?;
        let messages = data
            .get("chat_messages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(|m| {
                let role = if m.get("sender").and_then(Value::as_str) == Some("human") {
                    "user"
                } else {
                    "assistant"
                };
                json!({
                    "role": role,
                    "text": m.get("text").cloned().unwrap_or_else(|| json!("")),
                    "timestamp": m.get("created_at"),
                    "id": m.get("uuid"),
                })
            })
            .collect();
        Ok(Chat {
            messages,
            summary: data.get("summary").cloned().unwrap_or(Value::Null),
            model: data.get("model").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// A fetched chat
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    /// Messages in order
    pub messages: Vec<Value>,
    /// Server-side summary
    pub summary: Value,
    /// Model of the conversation
    pub model: Option<String>,
}

fn string(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// claude.ai Code sessions
///
/// # Errors
///
/// Returns error if the listing request fails
pub fn code_sessions(client: &WebClient<'_>) -> Result<Vec<Session>, WebError> {
    let data = client.get(&format!("{BASE_URL}/v1/sessions"), true)?;
    let sessions = data
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| {
            let id = string(s, "id")?;
            let status = string(s, "session_status").unwrap_or_else(|| "unknown".to_string());
            let context = s.get("session_context");
            let field = |key: &str| context.and_then(|c| c.get(key)).and_then(Value::as_array);
            let mut session = Session::remote(SessionSource::Web, id, status);
            session.title = string(s, "title");
            session.model = context.and_then(|c| string(c, "model"));
            session.repo = field("sources")
                .and_then(|list| list.first())
                .and_then(|source| string(source, "url"))
                .map(|url| url.replace("https://github.com/", ""));
            session.branch = field("outcomes")
                .and_then(|o| o.first())
                .and_then(|o| o.get("git_info"))
                .and_then(|g| g.get("branches"))
                .and_then(Value::as_array)
                .and_then(|b| b.first())
                .and_then(Value::as_str)
                .map(str::to_string);
            session.created_at = string(s, "created_at");
            session.updated_at = string(s, "updated_at");
            Some(session)
        })
        .collect();
    Ok(sessions)
}

/// claude.ai chat conversations
///
/// # Errors
///
/// Returns error if the listing request fails
pub fn chat_sessions(client: &WebClient<'_>) -> Result<Vec<Session>, WebError> {
    let url = format!("{BASE_URL}/api/organizations/{}/chat_conversations", client.org_id);
    let data = client.get(&url, false)?;
    let sessions = data
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| {
            let starred = c.get("is_starred").and_then(Value::as_bool).unwrap_or(false);
            let status = if starred { "starred" } else { "chat" };
            let mut session = Session::remote(SessionSource::Chat, string(c, "uuid")?, status.to_string());
            session.title = string(c, "name");
            session.model = string(c, "model");
            session.created_at = string(c, "created_at");
            session.updated_at = string(c, "updated_at");
            Some(session)
        })
        .collect();
    Ok(sessions)
}

/// Simplified Code session transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Messages in event order
    pub messages: Vec<Value>,
    /// Final `result` event, if any
    pub result: Value,
}

fn blocks(content: Option<&Value>) -> &[Value] {
    content
        .and_then(|c| c.get("content"))
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn block_texts(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .map(|b| b.get("text").and_then(Value::as_str).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fold raw session events into messages and a result summary
#[must_use]
pub fn parse_events(events: &[Value]) -> Conversation {
    let mut messages = Vec::new();
    let mut result = Value::Null;
    for event in events {
        let content = event.get("content");
        match event.get("type").and_then(Value::as_str) {
            Some("user") => {
                let text = match content {
                    Some(Value::String(s)) => s.clone(),
                    Some(inner) => match inner.get("content") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Array(parts)) => block_texts(parts),
                        _ => String::new(),
                    },
                    None => String::new(),
                };
                messages.push(json!({
                    "role": "user",
                    "text": text,
                    "timestamp": event.get("created_at"),
                    "id": event.get("id"),
                }));
            }
            Some("assistant") => {
                let parts = blocks(content);
                let tool_uses: Vec<Value> = parts
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                    .map(tool_use)
                    .collect();
                messages.push(json!({
                    "role": "assistant",
                    "text": block_texts(parts),
                    "tool_uses": if tool_uses.is_empty() { Value::Null } else { Value::Array(tool_uses) },
                    "timestamp": event.get("created_at"),
                    "id": event.get("id"),
                }));
            }
            Some("result") => {
                let field = |key: &str| content.and_then(|c| c.get(key)).cloned().unwrap_or(Value::Null);
                result = json!({
                    "total_cost_usd": field("total_cost_usd"),
                    "num_turns": field("num_turns"),
                    "duration_ms": field("duration_ms"),
                    "session_id": field("session_id"),
                    "is_error": field("is_error"),
                    "usage": field("usage"),
                });
            }
            Some("tool_use_summary") => {
                let field = |key: &str| content.and_then(|c| c.get(key)).cloned().unwrap_or(Value::Null);
                let is_error = content.and_then(|c| c.get("is_error")).cloned().unwrap_or(Value::Bool(false));
                messages.push(json!({
                    "role": "tool_result",
                    "tool_use_id": field("tool_use_id"),
                    "tool": field("name"),
                    "output_preview": truncate(&text_of(content.and_then(|c| c.get("output"))), 500),
                    "is_error": is_error,
                    "timestamp": event.get("created_at"),
                    "id": event.get("id"),
                }));
            }
            _ => {}
        }
    }
    Conversation { messages, result }
}
