//! Optional per-plugin `plugin.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// Manifest file name inside a plugin directory
pub const MANIFEST_FILE: &str = "plugin.json";

/// Invocation surface a capability may be exposed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    /// `toolbox dispatch`
    Cli,
    /// MCP `tools/list` and `tools/call`
    Mcp,
    /// OpenAI tool definitions and the chat runner
    Openai,
}

impl Surface {
    /// Every surface
    pub const ALL: [Surface; 3] = [Surface::Cli, Surface::Mcp, Surface::Openai];

    /// All surfaces as a set
    #[must_use]
    pub fn all() -> BTreeSet<Surface> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => f.write_str("cli"),
            Self::Mcp => f.write_str("mcp"),
            Self::Openai => f.write_str("openai"),
        }
    }
}

/// Contents of `plugin.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Must equal the contract name
    pub capability_id: String,
    /// Entry-point table key; the capability name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Exposed surfaces; all when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surfaces: Option<BTreeSet<Surface>>,
}

impl PluginManifest {
    /// Read a manifest if one exists next to the contract
    ///
    /// # Errors
    ///
    /// Returns the reason the file could not be read or parsed
    pub fn load(dir: &Path) -> Result<Option<Self>, String> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// Resolved entry-point name
    #[must_use]
    pub fn entry_point_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.entry_point.as_deref().unwrap_or(default)
    }

    /// Resolved surface set
    #[must_use]
    pub fn surfaces_or_all(&self) -> BTreeSet<Surface> {
        self.surfaces.clone().unwrap_or_else(Surface::all)
    }
}
