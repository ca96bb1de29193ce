//! MCP method routing over a [`Dispatcher`].
//!
//! Capability failures are tool results, not protocol errors: `tools/call`
//! always answers with the dispatch envelope and sets `isError` when it is a
//! failure. Protocol errors are reserved for malformed messages.

use crate::protocol::{JSONRPC_VERSION, Request, Response, RpcError, RpcErrorCode};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use toolbox_core::Envelope;
use toolbox_registry::{Dispatcher, Surface};

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "toolbox";

/// Protocol version offered when the client does not name one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Meta tool listing every capability
pub const LIST_CAPABILITIES_TOOL: &str = "toolbox_list_capabilities";

const INSTRUCTIONS: &str = "Toolbox exposes contract-described capabilities for developer and \
operations workflows. Every tool validates its arguments and its result against the \
capability contract and answers with an envelope: {\"ok\": true, \"result\": ...} or \
{\"ok\": false, \"error\": {\"code\", \"message\"}}.";

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP server state
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    // tool name -> capability name
    tools: Arc<IndexMap<String, String>>,
}

impl McpServer {
    /// Build a server exposing every MCP-enabled capability
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        let tools = dispatcher
            .registry()
            .for_surface(Surface::Mcp)
            .map(|record| (record.contract().name.tool_name(), record.name().to_string()))
            .collect();
        Self {
            dispatcher,
            tools: Arc::new(tools),
        }
    }

    /// Number of capability tools, excluding the meta tool
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// The dispatcher calls go through
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one raw message; `None` when nothing should be sent back
    #[must_use]
    pub fn handle_message(&self, text: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_value(value),
            Err(e) => {
                tracing::debug!(error = %e, "unparsable message");
                Some(
                    Response::error(
                        Value::Null,
                        RpcError::new(RpcErrorCode::ParseError, format!("Parse error: {e}")),
                    )
                    .to_value(),
                )
            }
        }
    }

    /// Handle a parsed message or batch
    #[must_use]
    pub fn handle_value(&self, value: Value) -> Option<Value> {
        match value {
            Value::Array(batch) if batch.is_empty() => Some(
                Response::error(Value::Null, RpcError::from_code(RpcErrorCode::InvalidRequest))
                    .to_value(),
            ),
            Value::Array(batch) => {
                let responses: Vec<Value> = batch
                    .into_iter()
                    .filter_map(|item| self.handle_single(item))
                    .collect();
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            single => self.handle_single(single),
        }
    }

    /// Handle on tokio's blocking pool
    pub async fn handle_message_blocking(&self, text: String) -> Option<Value> {
        let server = self.clone();
        match tokio::task::spawn_blocking(move || server.handle_message(&text)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "message handler failed");
                Some(
                    Response::error(
                        Value::Null,
                        RpcError::new(RpcErrorCode::InternalError, e.to_string()),
                    )
                    .to_value(),
                )
            }
        }
    }

    fn handle_single(&self, value: Value) -> Option<Value> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(
                    Response::error(
                        id,
                        RpcError::new(RpcErrorCode::InvalidRequest, format!("Invalid Request: {e}")),
                    )
                    .to_value(),
                );
            }
        };
        self.handle_request(request).map(|response| response.to_value())
    }

    /// Route one request
    #[must_use]
    pub fn handle_request(&self, request: Request) -> Option<Response> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(Response::error(
                request.id.unwrap_or(Value::Null),
                RpcError::new(RpcErrorCode::InvalidRequest, "jsonrpc must be \"2.0\""),
            ));
        }

        tracing::debug!(method = %request.method, "mcp request");
        let Some(id) = request.id else {
            // notifications/initialized, notifications/cancelled, ...
            return None;
        };

        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize(request.params.as_ref())),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params),
            other => Err(RpcError::new(
                RpcErrorCode::MethodNotFound,
                format!("Method not found: {other}"),
            )),
        };

        Some(match outcome {
            Ok(result) => Response::result(id, result),
            Err(error) => Response::error(id, error),
        })
    }

    fn initialize(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
            "instructions": INSTRUCTIONS,
        })
    }

    /// `tools/list` result
    #[must_use]
    pub fn list_tools(&self) -> Value {
        let registry = self.dispatcher.registry();
        let mut tools: Vec<Value> = self
            .tools
            .iter()
            .filter_map(|(tool, capability)| registry.get(capability).map(|record| (tool, record)))
            .map(|(tool, record)| {
                json!({
                    "name": tool,
                    "description": record.contract().description,
                    "inputSchema": strip_schema_keyword(record.contract().input_schema.clone()),
                })
            })
            .collect();
        tools.push(json!({
            "name": LIST_CAPABILITIES_TOOL,
            "description": "List all capability names available in this server.",
            "inputSchema": {"type": "object", "properties": {}},
        }));
        json!({ "tools": tools })
    }

    fn call_tool(&self, params: Option<Value>) -> Result<Value, RpcError> {
        let params: CallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| RpcError::new(RpcErrorCode::InvalidParams, format!("Invalid params: {e}")))?;
        let arguments = match params.arguments {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments,
        };

        let envelope = if params.name == LIST_CAPABILITIES_TOOL {
            let names: Vec<&str> = self.dispatcher.registry().names();
            Envelope::success(json!(names))
        } else {
            match self.tools.get(&params.name) {
                Some(capability) => self.dispatcher.invoke(capability, arguments),
                None => Envelope::unknown_capability(&params.name),
            }
        };
        Ok(tool_result(&envelope))
    }
}

fn tool_result(envelope: &Envelope) -> Value {
    let structured = envelope.to_value();
    json!({
        "content": [{"type": "text", "text": structured.to_string()}],
        "structuredContent": structured,
        "isError": !envelope.is_ok(),
    })
}

/// Drop `$schema`; MCP clients expect a bare schema object
#[must_use]
pub fn strip_schema_keyword(mut schema: Value) -> Value {
    if let Some(object) = schema.as_object_mut() {
        object.shift_remove("$schema");
    }
    schema
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use toolbox_core::{CapabilityError, CapabilityName, Contract};
    use toolbox_registry::Registry;

    pub(crate) fn test_server() -> McpServer {
        let echo = Contract::new(CapabilityName::parse("text.echo").unwrap())
            .with_description("Echo text")
            .with_input_schema(json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }))
            .with_output_schema(json!({"type": "object", "required": ["text"]}))
            .with_error("too_long", "Text over 10 chars");

        let mut builder = Registry::builder();
        builder
            .register(echo, |input: Value| -> Result<Value, CapabilityError> {
                let text = input["text"].as_str().unwrap_or_default().to_string();
                if text.len() > 10 {
                    return Err(CapabilityError::new("too_long", "text is too long"));
                }
                Ok(json!({ "text": text }))
            })
            .unwrap();
        McpServer::new(Dispatcher::new(Arc::new(builder.build())))
    }

    fn call(server: &McpServer, message: Value) -> Value {
        server.handle_message(&message.to_string()).unwrap()
    }

    #[test]
    fn test_initialize() {
        let server = test_server();
        let response = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": "2024-11-05", "capabilities": {}}}),
        );
        let result = &response["result"];
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "toolbox");
        assert_eq!(result["capabilities"], json!({"tools": {}}));
        assert!(result["instructions"].as_str().unwrap().contains("envelope"));
    }

    #[test]
    fn test_notifications_get_no_response() {
        let server = test_server();
        let message = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_message(&message.to_string()).is_none());
    }

    #[test]
    fn test_ping() {
        let response = call(&test_server(), json!({"jsonrpc": "2.0", "id": "a", "method": "ping"}));
        assert_eq!(response, json!({"jsonrpc": "2.0", "id": "a", "result": {}}));
    }

    #[test]
    fn test_tools_list() {
        let response = call(&test_server(), json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}));
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "text_echo");
        assert_eq!(tools[0]["description"], "Echo text");
        assert!(tools[0]["inputSchema"].get("$schema").is_none());
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["text"]));
        assert_eq!(tools[1]["name"], LIST_CAPABILITIES_TOOL);
    }

    #[test]
    fn test_tools_call_success() {
        let response = call(
            &test_server(),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "text_echo", "arguments": {"text": "hi"}}}),
        );
        let result = &response["result"];
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"], json!({"ok": true, "result": {"text": "hi"}}));
        let text: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(text, result["structuredContent"]);
    }

    #[test]
    fn test_tools_call_failures_are_results() {
        let server = test_server();
        let invalid = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "text_echo", "arguments": {}}}),
        );
        assert_eq!(invalid["result"]["isError"], true);
        assert_eq!(invalid["result"]["structuredContent"]["error"]["code"], "validation_error");

        let declared = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "text_echo", "arguments": {"text": "a much longer text"}}}),
        );
        assert_eq!(declared["result"]["structuredContent"]["error"]["code"], "too_long");

        let unknown = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call",
                   "params": {"name": "nope_tool"}}),
        );
        assert!(unknown.get("error").is_none());
        assert_eq!(
            unknown["result"]["structuredContent"]["error"]["code"],
            "unknown_capability"
        );
    }

    #[test]
    fn test_list_capabilities_tool() {
        let response = call(
            &test_server(),
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
                   "params": {"name": LIST_CAPABILITIES_TOOL}}),
        );
        assert_eq!(
            response["result"]["structuredContent"],
            json!({"ok": true, "result": ["text.echo"]})
        );
    }

    #[test]
    fn test_protocol_errors() {
        let server = test_server();
        let unknown = call(&server, json!({"jsonrpc": "2.0", "id": 8, "method": "resources/list"}));
        assert_eq!(unknown["error"]["code"], -32601);
        assert_eq!(unknown["id"], 8);

        let parse = server.handle_message("{not json").unwrap();
        assert_eq!(parse["error"]["code"], -32700);
        assert_eq!(parse["id"], Value::Null);

        let params = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 9, "method": "tools/call", "params": {"arguments": {}}}),
        );
        assert_eq!(params["error"]["code"], -32602);

        let version = call(&server, json!({"jsonrpc": "1.0", "id": 10, "method": "ping"}));
        assert_eq!(version["error"]["code"], -32600);
    }

    #[test]
    fn test_batch() {
        let server = test_server();
        let response = call(
            &server,
            json!([
                {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": 2, "method": "ping"}
            ]),
        );
        assert_eq!(response.as_array().unwrap().len(), 2);
        assert!(
            server
                .handle_message(&json!([{"jsonrpc": "2.0", "method": "notifications/x"}]).to_string())
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_blocking_handler() {
        let server = test_server();
        let response = server
            .handle_message_blocking(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string())
            .await
            .unwrap();
        assert_eq!(response["result"], json!({}));
    }
}
