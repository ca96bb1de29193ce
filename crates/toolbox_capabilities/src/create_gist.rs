//! `github.create_gist`: secret gist via the GitHub CLI.

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde::{Deserialize, Serialize};
use toolbox_core::DomainError;

/// Capability name
pub const NAME: &str = "github.create_gist";

/// Input
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GistInput {
    /// Local files to upload
    #[serde(default)]
    pub files: Vec<String>,
    /// Inline text, used when `files` is empty
    #[serde(default)]
    pub content: Option<String>,
    /// Name for inline content
    #[serde(default)]
    pub filename: Option<String>,
    /// Gist description
    #[serde(default)]
    pub description: Option<String>,
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GistOutput {
    /// URL printed by `gh`
    pub gist_url: String,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum GistError {
    /// gh missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Inputs are inconsistent
    #[error("{0}")]
    InvalidArguments(&'static str),
    /// `gh gist create` exited non-zero
    #[error("{0}")]
    Gist(String),
}

impl DomainError for GistError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Gist(_) => "gist_error",
        }
    }
}

/// `gh gist create` invocation for `input`
///
/// # Errors
///
/// Returns `invalid_arguments` if neither files nor content are given, or if
/// `filename` is combined with files
pub fn build_command(input: &GistInput) -> Result<CommandSpec, GistError> {
    if input.filename.is_some() && !input.files.is_empty() {
        return Err(GistError::InvalidArguments(
            "filename is only valid when using content (not files)",
        ));
    }
    let content = input.content.as_deref().filter(|c| !c.is_empty());
    if input.files.is_empty() && content.is_none() {
        return Err(GistError::InvalidArguments("provide either files or content"));
    }

    let mut spec = CommandSpec::new("gh").args(["gist", "create"]);
    if let Some(description) = input.description.as_deref().filter(|d| !d.is_empty()) {
        spec = spec.arg("-d").arg(description);
    }

    match content {
        Some(content) if input.files.is_empty() => {
            spec = spec.arg("-");
            if let Some(filename) = &input.filename {
                spec = spec.arg("-f").arg(filename.as_str());
            }
            Ok(spec.stdin(content))
        }
        _ => Ok(spec.args(input.files.iter().map(String::as_str))),
    }
}

/// Create the gist
///
/// # Errors
///
/// Returns `dependency_error` without gh, `invalid_arguments` on bad input,
/// and `gist_error` on a non-zero exit
pub fn create_gist(runner: &dyn CommandRunner, input: GistInput) -> Result<GistOutput, GistError> {
    process::require(runner, "gh")?;
    let spec = build_command(&input)?;

    let output = process::run(runner, &spec)?;
    if !output.success() {
        return Err(GistError::Gist(output.error_message("gh gist create failed")));
    }

    Ok(GistOutput {
        gist_url: output.stdout.trim().to_string(),
    })
}
