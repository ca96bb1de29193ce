//! OpenAI chat-completions tool-calling loop.
//!
//! The model sees every OpenAI-enabled capability as a function. Each tool
//! call goes through dispatch and its envelope is fed back as a `tool`
//! message until the model answers without calling anything.

use crate::error::{CliError, CliResult};
use crate::toolgen::openai_tools;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use toolbox_core::{CapabilityError, Envelope};
use toolbox_registry::{Dispatcher, Surface};

/// API key variable
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Model variable
pub const ENV_MODEL: &str = "OPENAI_MODEL";
/// Base URL variable
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
/// API root used when none is configured
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Error code for tool arguments that are not JSON
pub const INVALID_TOOL_ARGUMENTS: &str = "invalid_tool_arguments";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiSettings {
    /// Bearer token
    pub api_key: String,
    /// Chat model
    pub model: String,
    /// API root, without trailing slash
    pub base_url: String,
}

impl OpenAiSettings {
    /// Read settings from the environment
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not set
    pub fn from_env() -> CliResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CliResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let api_key = get(ENV_API_KEY).ok_or(CliError::MissingSetting(ENV_API_KEY))?;
        Ok(Self {
            api_key,
            model: get(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get(ENV_BASE_URL)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// Sends one chat-completions request
pub trait ChatBackend {
    /// POST `request` and return the response body
    fn complete(&self, request: &Value) -> impl Future<Output = CliResult<Value>> + Send;
}

/// reqwest-backed client
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    /// Client for `settings`
    #[must_use]
    pub fn new(settings: OpenAiSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }
}

impl ChatBackend for OpenAiClient {
    fn complete(&self, request: &Value) -> impl Future<Output = CliResult<Value>> + Send {
        let url = format!("{}/chat/completions", self.settings.base_url);
        let call = self
            .http
            .post(url)
            .bearer_auth(&self.settings.api_key)
            .json(request);
        async move {
            let response = call.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CliError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(response.json::<Value>().await?)
        }
    }
}

struct ToolCall {
    id: String,
    name: String,
    arguments: String,
}

fn tool_calls(message: &Value) -> CliResult<Vec<ToolCall>> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    calls
        .iter()
        .map(|call| {
            let id = call.get("id").and_then(Value::as_str);
            let function = call.get("function");
            let name = function.and_then(|f| f.get("name")).and_then(Value::as_str);
            match (id, name) {
                (Some(id), Some(name)) => Ok(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: function
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                }),
                _ => Err(CliError::BadResponse(format!("malformed tool call: {call}"))),
            }
        })
        .collect()
}

/// Run a conversation until the model replies without tool calls
///
/// # Errors
///
/// Returns error if a request fails, the response is malformed, or no final
/// answer arrives within `max_turns` requests
pub async fn run_conversation<B: ChatBackend>(
    backend: &B,
    dispatcher: &Dispatcher,
    model: &str,
    user_message: &str,
    max_turns: usize,
) -> CliResult<String> {
    let tools = openai_tools(dispatcher.registry());
    let by_tool: HashMap<String, String> = dispatcher
        .registry()
        .for_surface(Surface::Openai)
        .map(|r| (r.contract().name.tool_name(), r.name().to_string()))
        .collect();

    let mut messages = vec![json!({"role": "user", "content": user_message})];

    for turn in 0..max_turns {
        let mut request = json!({"model": model, "messages": messages});
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools.clone());
        }
        let response = backend.complete(&request).await?;
        let message = response
            .pointer("/choices/0/message")
            .cloned()
            .ok_or_else(|| CliError::BadResponse("missing choices[0].message".to_string()))?;

        let calls = tool_calls(&message)?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if calls.is_empty() {
            tracing::debug!(turn, "final answer");
            return Ok(content);
        }

        messages.push(json!({
            "role": "assistant",
            "content": content,
            "tool_calls": message.get("tool_calls").cloned().unwrap_or(Value::Null),
        }));

        for call in calls {
            tracing::info!(tool = %call.name, "tool call");
            let envelope = match serde_json::from_str::<Value>(&call.arguments) {
                Err(e) => Envelope::from_error(CapabilityError::new(
                    INVALID_TOOL_ARGUMENTS,
                    format!("invalid tool arguments: {e}"),
                )),
                Ok(arguments) => match by_tool.get(&call.name) {
                    Some(capability) => dispatcher.invoke_blocking(capability.clone(), arguments).await,
                    None => Envelope::unknown_capability(&call.name),
                },
            };
            messages.push(json!({
                "role": "tool",
                "tool_call_id": call.id,
                "content": envelope.to_value().to_string(),
            }));
        }
    }
    Err(CliError::TurnLimit(max_turns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolgen::tests::{plugin_tree, registry};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Value>>,
        requests: Mutex<Vec<Value>>,
    }

    impl Scripted {
        fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ChatBackend for Scripted {
        fn complete(&self, request: &Value) -> impl Future<Output = CliResult<Value>> + Send {
            self.requests.lock().unwrap().push(request.clone());
            let next = self.responses.lock().unwrap().pop_front();
            async move { next.ok_or_else(|| CliError::BadResponse("script exhausted".to_string())) }
        }
    }

    fn tool_call_reply(calls: Value) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": null, "tool_calls": calls}}]})
    }

    fn final_reply(text: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": text}}]})
    }

    fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let root = plugin_tree();
        let registry = registry(root.path());
        (root, Dispatcher::new(Arc::new(registry)))
    }

    #[test]
    fn test_settings() {
        let settings = OpenAiSettings::from_lookup(|key| match key {
            ENV_API_KEY => Some("sk-test".to_string()),
            ENV_BASE_URL => Some("http://localhost:9000/v1/".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.base_url, "http://localhost:9000/v1");

        let err = OpenAiSettings::from_lookup(|_| Some(String::new())).unwrap_err();
        assert!(matches!(err, CliError::MissingSetting(ENV_API_KEY)));
    }

    #[tokio::test]
    async fn test_tool_loop() {
        let (_root, dispatcher) = dispatcher();
        let backend = Scripted::new(vec![
            tool_call_reply(json!([
                {"id": "c1", "type": "function", "function": {"name": "text_upper", "arguments": "{\"text\": \"hi\"}"}},
                {"id": "c2", "type": "function", "function": {"name": "text_upper", "arguments": "{oops"}},
                {"id": "c3", "type": "function", "function": {"name": "ops_restart", "arguments": "{}"}}
            ])),
            final_reply("HI"),
        ]);

        let answer = run_conversation(&backend, &dispatcher, "m", "shout hi", 4).await.unwrap();
        assert_eq!(answer, "HI");

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["tools"].as_array().unwrap().len(), 1);

        let messages = requests[1]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[1]["role"], "assistant");

        let results: Vec<Value> = messages[2..]
            .iter()
            .map(|m| serde_json::from_str(m["content"].as_str().unwrap()).unwrap())
            .collect();
        assert_eq!(messages[2]["tool_call_id"], "c1");
        assert_eq!(results[0], json!({"ok": true, "result": {"text": "HI"}}));
        assert_eq!(results[1]["error"]["code"], INVALID_TOOL_ARGUMENTS);
        // not exposed on the openai surface
        assert_eq!(results[2]["error"]["code"], "unknown_capability");
    }

    #[tokio::test]
    async fn test_turn_limit() {
        let (_root, dispatcher) = dispatcher();
        let call = json!([{"id": "c", "type": "function", "function": {"name": "text_upper", "arguments": "{\"text\": \"a\"}"}}]);
        let backend = Scripted::new(vec![tool_call_reply(call.clone()), tool_call_reply(call)]);
        let err = run_conversation(&backend, &dispatcher, "m", "loop", 2).await.unwrap_err();
        assert!(matches!(err, CliError::TurnLimit(2)));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (_root, dispatcher) = dispatcher();
        let backend = Scripted::new(vec![json!({"choices": []})]);
        let err = run_conversation(&backend, &dispatcher, "m", "x", 1).await.unwrap_err();
        assert!(matches!(err, CliError::BadResponse(_)));
    }
}
