//! Toolbox MCP Server
//!
//! JSON-RPC 2.0 Model Context Protocol server over the toolbox registry.
//! Every MCP-enabled capability becomes one tool.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{Request, Response, RpcError, RpcErrorCode};
pub use server::{LIST_CAPABILITIES_TOOL, McpServer};
pub use transport::{TransportError, router, serve_http, serve_lines, serve_stdio};
