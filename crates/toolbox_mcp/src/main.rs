//! Toolbox MCP Server
//!
//! Serves the capability registry as MCP tools over stdio or HTTP.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolbox_core::{ToolboxConfig, Transport};
use toolbox_mcp::{McpServer, serve_http, serve_stdio};
use toolbox_registry::Dispatcher;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolbox-mcp")]
#[command(about = "Toolbox MCP server", long_about = None)]
struct Args {
    /// Plugin tree root
    #[arg(long)]
    capabilities_dir: Option<PathBuf>,

    /// `stdio` or `http`
    #[arg(long)]
    transport: Option<Transport>,

    /// HTTP bind host
    #[arg(long)]
    host: Option<String>,

    /// HTTP bind port
    #[arg(long)]
    port: Option<u16>,

    /// Tracing filter
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, mut config: ToolboxConfig) -> ToolboxConfig {
        if let Some(dir) = self.capabilities_dir {
            config.capabilities_dir = dir;
        }
        if let Some(transport) = self.transport {
            config.mcp.transport = transport;
        }
        if let Some(host) = self.host {
            config.mcp.host = host;
        }
        if let Some(port) = self.port {
            config.mcp.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_filter = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.apply(ToolboxConfig::from_env().context("invalid environment")?);

    // stdout carries protocol messages
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let registry = toolbox_capabilities::default_registry(&config.capabilities_dir).with_context(|| {
        format!(
            "failed to load capabilities from {}",
            config.capabilities_dir.display()
        )
    })?;
    tracing::info!(capabilities = registry.len(), "registry loaded");

    let server = McpServer::new(Dispatcher::new(Arc::new(registry)));
    match config.mcp.transport {
        Transport::Stdio => serve_stdio(server).await?,
        Transport::Http => serve_http(server, &config.mcp.bind_addr()).await?,
    }

    Ok(())
}
