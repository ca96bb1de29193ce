//! `text.normalize_markdown`

use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Capability name
pub const NAME: &str = "text.normalize_markdown";

const TRIM_TRAILING_WHITESPACE: &str = "trim_trailing_whitespace";
const ENSURE_FINAL_NEWLINE: &str = "ensure_final_newline";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeInput {
    /// Markdown source
    pub text: String,
    /// Rule toggles
    #[serde(default)]
    pub options: NormalizeOptions,
}

/// Rule toggles, all on by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NormalizeOptions {
    /// Strip trailing whitespace from every line
    #[serde(default = "enabled")]
    pub trim_trailing_whitespace: bool,
    /// End with exactly one `\n` if none is present
    #[serde(default = "enabled")]
    pub ensure_final_newline: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            trim_trailing_whitespace: true,
            ensure_final_newline: true,
        }
    }
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeOutput {
    /// Normalized text
    pub text: String,
    /// Rules that changed something, in application order
    pub changes: Vec<String>,
}

/// Apply the enabled rules
///
/// Line breaks are kept as they are, so normalizing the output again changes
/// nothing.
///
/// # Errors
///
/// Never fails
pub fn normalize_markdown(input: NormalizeInput) -> Result<NormalizeOutput, Infallible> {
    Ok(normalize(&input.text, input.options))
}

/// Pure normalization
#[must_use]
pub fn normalize(text: &str, options: NormalizeOptions) -> NormalizeOutput {
    let mut changes = Vec::new();
    let mut normalized = text.to_string();

    if options.trim_trailing_whitespace {
        let trimmed = normalized
            .split('\n')
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
        if trimmed != normalized {
            changes.push(TRIM_TRAILING_WHITESPACE.to_string());
        }
        normalized = trimmed;
    }

    if options.ensure_final_newline && !normalized.ends_with('\n') {
        normalized.push('\n');
        changes.push(ENSURE_FINAL_NEWLINE.to_string());
    }

    NormalizeOutput {
        text: normalized,
        changes,
    }
}
