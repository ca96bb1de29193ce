//! Stdio and streamable-HTTP transports.

use crate::server::McpServer;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tower_http::trace::TraceLayer;

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Reading or writing a stream failed
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The HTTP listener could not bind
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Serve newline-delimited JSON over stdin and stdout until stdin closes
///
/// # Errors
///
/// Returns error if stdin or stdout fail
pub async fn serve_stdio(server: McpServer) -> Result<(), TransportError> {
    tracing::info!(tools = server.tool_count(), "serving MCP on stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    serve_lines(server, stdin, tokio::io::stdout()).await
}

/// Line loop behind [`serve_stdio`], generic for tests
///
/// # Errors
///
/// Returns error if reading or writing fails
pub async fn serve_lines<R, W>(server: McpServer, reader: R, mut writer: W) -> Result<(), TransportError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = server.handle_message_blocking(line).await {
            let mut out = response.to_string();
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Router with `POST /mcp` and `GET /health`
pub fn router(server: McpServer) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn mcp_handler(State(server): State<McpServer>, body: String) -> Response {
    match server.handle_message_blocking(body).await {
        Some(response) => Json(response).into_response(),
        // Notifications only
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_handler(State(server): State<McpServer>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": crate::server::SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "tools": server.tool_count(),
    }))
}

/// Serve MCP over HTTP at `addr`
///
/// # Errors
///
/// Returns error if the address cannot be bound or serving fails
pub async fn serve_http(server: McpServer, addr: &str) -> Result<(), TransportError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let local: SocketAddr = listener.local_addr()?;
    tracing::info!(%local, tools = server.tool_count(), "serving MCP on http");
    axum::serve(listener, router(server)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::test_server;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn post_mcp(body: Value) -> (StatusCode, Vec<u8>) {
        let response = router(test_server())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_http_tools_call() {
        let (status, body) = post_mcp(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "text_echo", "arguments": {"text": "hey"}}
        }))
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["result"]["structuredContent"]["result"]["text"], "hey");
    }

    #[tokio::test]
    async fn test_http_notification_accepted() {
        let (status, body) = post_mcp(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(test_server())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["tools"], 1);
    }

    #[tokio::test]
    async fn test_stdio_lines() {
        let input = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
            String::new(),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}).to_string(),
            "garbage".to_string(),
        ]
        .join("\n");
        let mut output = Vec::new();
        serve_lines(test_server(), input.as_bytes(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["error"]["code"], -32700);
    }
}
