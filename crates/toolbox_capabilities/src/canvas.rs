//! `canvas.extract_markdown`: pull the markdown body out of a shared canvas page.
//!
//! The page streams its data as `streamController.enqueue("...")` calls. Each
//! argument is a JS string literal holding a JSON array in which a field name
//! is followed by its value.

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use toolbox_core::{DomainError, ErrorCode};
use unicode_normalization::UnicodeNormalization;

/// Capability name
pub const NAME: &str = "canvas.extract_markdown";

const DEFAULT_BASENAME: &str = "canvas";

static ENQUEUE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"streamController\.enqueue\("((?:\\.|[^"\\])*)"\);"#));

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasInput {
    /// Shared canvas URL
    pub url: String,
    /// `auto`, an existing directory, or a file path
    #[serde(default)]
    pub output: Option<String>,
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanvasOutput {
    /// Canvas title, if the payload has one
    pub title: Option<String>,
    /// Markdown body
    pub markdown: String,
    /// Slug of the title plus `.md`
    pub suggested_filename: String,
    /// Where the markdown was written
    pub output_path: Option<String>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    /// curl missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// URL is blank
    #[error("url is required")]
    EmptyUrl,
    /// Fetch failed
    #[error("{0}")]
    Network(String),
    /// No markdown in the page
    #[error("{0}")]
    Parse(String),
    /// Markdown could not be written
    #[error("{0}")]
    Output(String),
}

impl DomainError for CanvasError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::EmptyUrl => ErrorCode::ValidationError.as_str(),
            Self::Network(_) => "network_error",
            Self::Parse(_) => "parse_error",
            Self::Output(_) => "output_error",
        }
    }
}

/// Title and markdown from the first payload that has content
///
/// # Errors
///
/// Returns `parse_error` if no payload carries a `content` value
pub fn extract_payload(html: &str) -> Result<(Option<String>, String), CanvasError> {
    let pattern = ENQUEUE
        .as_ref()
        .map_err(|e| CanvasError::Parse(format!("invalid payload pattern: {e}")))?;

    for captures in pattern.captures_iter(html) {
        let Some(literal) = captures.get(1) else {
            continue;
        };
        let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{}\"", literal.as_str())) else {
            continue;
        };
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&decoded) else {
            continue;
        };

        let value_after = |key: &str| {
            items
                .iter()
                .position(|item| item.as_str() == Some(key))
                .and_then(|idx| items.get(idx + 1))
        };
        let title = value_after("title").and_then(Value::as_str).map(str::to_string);
        if let Some(markdown) = value_after("content").and_then(Value::as_str) {
            return Ok((title, markdown.to_string()));
        }
    }
    Err(CanvasError::Parse(
        "markdown content not found in canvas payload".to_string(),
    ))
}

/// ASCII slug of a title, `canvas` when nothing is left
///
/// Accented letters fold to their base letter through NFKD; anything still
/// outside ASCII is dropped.
#[must_use]
pub fn slugify(title: Option<&str>) -> String {
    let Some(title) = title else {
        return DEFAULT_BASENAME.to_string();
    };
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.nfkd().filter(char::is_ascii) {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        DEFAULT_BASENAME.to_string()
    } else {
        slug
    }
}

/// Suggested file name for a title
#[must_use]
pub fn suggest_filename(title: Option<&str>) -> String {
    format!("{}.md", slugify(title))
}

/// Where `output` says to write
///
/// # Errors
///
/// Returns `output_error` for a directory-looking path that does not exist
pub fn resolve_output_path(output: &str, title: Option<&str>) -> Result<PathBuf, CanvasError> {
    if output == "auto" {
        return Ok(PathBuf::from(suggest_filename(title)));
    }
    let path = Path::new(output);
    if path.is_dir() {
        return Ok(path.join(suggest_filename(title)));
    }
    if output.ends_with(MAIN_SEPARATOR) || output.ends_with('/') {
        return Err(CanvasError::Output(format!(
            "output directory not found: {output}"
        )));
    }
    Ok(path.to_path_buf())
}

/// Fetch, extract, and optionally write
///
/// # Errors
///
/// Returns `dependency_error` without curl, `network_error` on fetch failure,
/// `parse_error` when no markdown is found, and `output_error` when writing
/// fails
pub fn extract_markdown(
    runner: &dyn CommandRunner,
    input: CanvasInput,
) -> Result<CanvasOutput, CanvasError> {
    let url = input.url.trim();
    if url.is_empty() {
        return Err(CanvasError::EmptyUrl);
    }
    process::require(runner, "curl")?;

    let output = process::run(runner, &CommandSpec::new("curl").args(["-fsSL", url]))?;
    if !output.success() {
        return Err(CanvasError::Network(output.error_message("curl failed")));
    }

    let (title, markdown) = extract_payload(&output.stdout)?;
    let suggested_filename = suggest_filename(title.as_deref());

    let output_path = match input.output.as_deref().filter(|o| !o.is_empty()) {
        Some(target) => {
            let path = resolve_output_path(target, title.as_deref())?;
            std::fs::write(&path, &markdown).map_err(|e| {
                CanvasError::Output(format!("failed to write {}: {e}", path.display()))
            })?;
            tracing::info!(path = %path.display(), "wrote canvas markdown");
            Some(path.display().to_string())
        }
        None => None,
    };

    Ok(CanvasOutput {
        title,
        markdown,
        suggested_filename,
        output_path,
    })
}
