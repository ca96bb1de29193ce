//! Capability identifiers.
//!
//! Names follow the dotted `domain.verb_object` convention, e.g.
//! `text.normalize_markdown`. They are the only identity a capability has.

use crate::error::CoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Validated capability name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityName {
    raw: String,
    dot: usize,
}

impl CapabilityName {
    /// Parse and validate a capability name
    ///
    /// # Errors
    ///
    /// Returns error if the name is not `domain.action` with lowercase
    /// ASCII segments
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let (domain, action) = name
            .split_once('.')
            .ok_or_else(|| invalid("expected exactly one '.'"))?;
        if action.contains('.') {
            return Err(invalid("expected exactly one '.'"));
        }

        if !is_segment(domain, false) {
            return Err(invalid("domain must be lowercase alphanumeric"));
        }
        if !is_segment(action, true) {
            return Err(invalid("action must be lowercase alphanumeric with underscores"));
        }
        if action.ends_with('_') || action.contains("__") {
            return Err(invalid("action must not end with or repeat '_'"));
        }

        Ok(Self {
            raw: name.to_string(),
            dot: domain.len(),
        })
    }

    /// Domain segment (`text` in `text.normalize_markdown`)
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.raw[..self.dot]
    }

    /// Action segment (`normalize_markdown` in `text.normalize_markdown`)
    #[must_use]
    pub fn action(&self) -> &str {
        &self.raw[self.dot + 1..]
    }

    /// Full dotted name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Identifier safe for surfaces that reject dots (MCP tool names)
    #[must_use]
    pub fn tool_name(&self) -> String {
        self.raw.replace('.', "_")
    }
}

fn is_segment(segment: &str, allow_underscore: bool) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || (allow_underscore && c == '_'))
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for CapabilityName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for CapabilityName {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl Serialize for CapabilityName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for CapabilityName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
