//! Runtime configuration.
//!
//! Defaults are overridden by `TOOLBOX_*` environment variables; command-line
//! flags in the binaries take precedence over both.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable naming the capabilities directory
pub const ENV_CAPABILITIES_DIR: &str = "TOOLBOX_CAPABILITIES_DIR";
/// Environment variable holding the tracing filter
pub const ENV_LOG: &str = "TOOLBOX_LOG";
/// Environment variable selecting the MCP transport
pub const ENV_TRANSPORT: &str = "TOOLBOX_TRANSPORT";
/// Environment variable holding the HTTP bind host
pub const ENV_HOST: &str = "TOOLBOX_HOST";
/// Environment variable holding the HTTP bind port
pub const ENV_PORT: &str = "TOOLBOX_PORT";

/// MCP transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    #[default]
    Stdio,
    /// JSON-RPC over `POST /mcp`
    Http,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Http => f.write_str("http"),
        }
    }
}

impl FromStr for Transport {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" | "streamable-http" => Ok(Self::Http),
            other => Err(CoreError::Config {
                key: ENV_TRANSPORT.to_string(),
                reason: format!("unknown transport '{other}' (expected stdio or http)"),
            }),
        }
    }
}

/// MCP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    /// Transport to serve on
    pub transport: Transport,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            host: "127.0.0.1".to_string(),
            port: 8768,
        }
    }
}

impl McpConfig {
    /// `host:port` for binding
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolboxConfig {
    /// Root scanned for plugin directories
    pub capabilities_dir: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive
    pub log_filter: String,
    /// MCP server settings
    pub mcp: McpConfig,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            capabilities_dir: PathBuf::from("capabilities"),
            log_filter: "info".to_string(),
            mcp: McpConfig::default(),
        }
    }
}

impl ToolboxConfig {
    /// Defaults overlaid with the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparsable value
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get(ENV_CAPABILITIES_DIR) {
            config.capabilities_dir = PathBuf::from(dir);
        }
        if let Some(filter) = get(ENV_LOG) {
            config.log_filter = filter;
        }
        if let Some(transport) = get(ENV_TRANSPORT) {
            config.mcp.transport = transport.parse()?;
        }
        if let Some(host) = get(ENV_HOST) {
            config.mcp.host = host;
        }
        if let Some(port) = get(ENV_PORT) {
            config.mcp.port = port.trim().parse().map_err(|_| CoreError::Config {
                key: ENV_PORT.to_string(),
                reason: format!("'{port}' is not a valid port"),
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ToolboxConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ToolboxConfig::default());
        assert_eq!(config.capabilities_dir, PathBuf::from("capabilities"));
        assert_eq!(config.mcp.transport, Transport::Stdio);
        assert_eq!(config.mcp.bind_addr(), "127.0.0.1:8768");
    }

    #[test]
    fn test_overrides() {
        let config = ToolboxConfig::from_lookup(lookup(&[
            (ENV_CAPABILITIES_DIR, "/srv/caps"),
            (ENV_LOG, "toolbox=debug"),
            (ENV_TRANSPORT, "HTTP"),
            (ENV_HOST, "0.0.0.0"),
            (ENV_PORT, "9000"),
        ]))
        .unwrap();
        assert_eq!(config.capabilities_dir, PathBuf::from("/srv/caps"));
        assert_eq!(config.log_filter, "toolbox=debug");
        assert_eq!(config.mcp.transport, Transport::Http);
        assert_eq!(config.mcp.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = ToolboxConfig::from_lookup(lookup(&[(ENV_PORT, ""), (ENV_LOG, "  ")])).unwrap();
        assert_eq!(config.mcp.port, 8768);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_invalid_port() {
        let err = ToolboxConfig::from_lookup(lookup(&[(ENV_PORT, "high")])).unwrap_err();
        assert!(matches!(err, CoreError::Config { ref key, .. } if key == ENV_PORT));
    }

    #[test]
    fn test_invalid_transport() {
        assert!(ToolboxConfig::from_lookup(lookup(&[(ENV_TRANSPORT, "carrier-pigeon")])).is_err());
    }

    #[test]
    fn test_transport_display_parses_back() {
        for transport in [Transport::Stdio, Transport::Http] {
            assert_eq!(transport.to_string().parse::<Transport>().unwrap(), transport);
        }
    }
}
