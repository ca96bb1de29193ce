//! `browser.export_cookies`: copy one domain's browser cookies to a
//! Netscape `cookies.txt` file.
//!
//! `yt-dlp --cookies-from-browser` reads the browser store and dumps the full
//! jar; only rows for the requested domain reach the output file. yt-dlp
//! exits non-zero when given no URL but still writes the jar, so the jar
//! file, not the exit status, decides success.

use crate::netscape::{self, Cookie};
use crate::paths;
use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toolbox_core::{DomainError, ErrorCode};

/// Capability name
pub const NAME: &str = "browser.export_cookies";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct ExportCookiesInput {
    /// Domain to keep, e.g. `brighttalk.com`
    pub domain: String,
    /// Destination cookies file
    pub output: String,
    /// Browser whose store is read
    #[serde(default = "default_browser")]
    pub browser: String,
    /// Browser profile name or path
    #[serde(default)]
    pub profile: Option<String>,
    /// Firefox container
    #[serde(default)]
    pub container: Option<String>,
    /// Linux keyring holding the cookie key
    #[serde(default)]
    pub keyring: Option<String>,
    /// Keep cookies of subdomains too
    #[serde(default = "default_true")]
    pub include_subdomains: bool,
    /// Suppress yt-dlp messages
    #[serde(default)]
    pub quiet: bool,
}

fn default_browser() -> String {
    "safari".to_string()
}

fn default_true() -> bool {
    true
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportCookiesOutput {
    /// Absolute path written
    pub output_path: String,
    /// Rows written
    pub cookie_count: usize,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum ExportCookiesError {
    /// yt-dlp missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Blank domain or output
    #[error("{0}")]
    Invalid(String),
    /// Browser store could not be read
    #[error("Failed to extract cookies from browser={browser:?}: {message}. This must run on the same machine as the browser profile.")]
    Extraction {
        /// Browser asked for
        browser: String,
        /// yt-dlp message
        message: String,
    },
    /// Output file could not be written
    #[error("cannot write {path}: {source}")]
    Output {
        /// Destination
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl DomainError for ExportCookiesError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Invalid(_) => ErrorCode::ValidationError.as_str(),
            Self::Extraction { .. } => "extraction_error",
            Self::Output { .. } => "output_error",
        }
    }
}

/// yt-dlp browser spec: `BROWSER[+KEYRING][:PROFILE][::CONTAINER]`
#[must_use]
pub fn browser_spec(input: &ExportCookiesInput) -> String {
    let mut spec = input.browser.trim().to_string();
    if let Some(keyring) = input.keyring.as_deref().filter(|k| !k.is_empty()) {
        spec.push('+');
        spec.push_str(keyring);
    }
    let profile = input.profile.as_deref().filter(|p| !p.is_empty());
    let container = input.container.as_deref().filter(|c| !c.is_empty());
    if let Some(profile) = profile {
        spec.push(':');
        spec.push_str(profile);
    }
    if let Some(container) = container {
        if profile.is_none() {
            spec.push(':');
        }
        spec.push_str("::");
        spec.push_str(container);
    }
    spec
}

/// Rows of `jar` belonging to `domain`
#[must_use]
pub fn filter_jar<'a>(jar: &'a str, domain: &str, include_subdomains: bool) -> Vec<Cookie<'a>> {
    netscape::cookies(jar)
        .filter(|cookie| netscape::domain_matches(cookie.domain, domain, include_subdomains))
        .collect()
}

fn render(rows: &[Cookie<'_>]) -> String {
    let mut text = format!("{}\n\n", netscape::HEADER);
    for row in rows {
        text.push_str(row.line);
        text.push('\n');
    }
    text
}

fn jar_path(out_path: &Path) -> PathBuf {
    let name = out_path
        .file_name()
        .map_or_else(|| "cookies".to_string(), |n| n.to_string_lossy().into_owned());
    out_path.with_file_name(format!(".{name}.browser"))
}

/// Export cookies for `input.domain`
///
/// # Errors
///
/// Returns `dependency_error` without yt-dlp, `extraction_error` when the
/// browser store cannot be read and `output_error` when writing fails
pub fn export_cookies(
    runner: &dyn CommandRunner,
    input: ExportCookiesInput,
) -> Result<ExportCookiesOutput, ExportCookiesError> {
    if input.domain.trim().is_empty() {
        return Err(ExportCookiesError::Invalid("domain is required".to_string()));
    }
    if input.output.trim().is_empty() {
        return Err(ExportCookiesError::Invalid("output is required".to_string()));
    }
    process::require(runner, "yt-dlp")?;

    let out_path = paths::absolute(&paths::expand_home(input.output.trim()));
    let output_error = |source: std::io::Error| ExportCookiesError::Output {
        path: out_path.display().to_string(),
        source,
    };
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(output_error)?;
    }

    let jar = jar_path(&out_path);
    let mut spec = CommandSpec::new("yt-dlp")
        .arg("--cookies-from-browser")
        .arg(browser_spec(&input))
        .arg("--cookies")
        .arg(jar.display().to_string())
        .arg("--skip-download");
    if input.quiet {
        spec = spec.args(["--quiet", "--no-warnings"]);
    }
    tracing::info!(browser = %input.browser, domain = %input.domain, "exporting browser cookies");
    let result = process::run(runner, &spec)?;

    let contents = std::fs::read_to_string(&jar);
    // Best effort: the jar holds every cookie of the browser.
    let _ = std::fs::remove_file(&jar);
    let contents = contents.map_err(|_| ExportCookiesError::Extraction {
        browser: input.browser.clone(),
        message: result.error_message("yt-dlp wrote no cookies"),
    })?;

    let rows = filter_jar(&contents, input.domain.trim(), input.include_subdomains);
    std::fs::write(&out_path, render(&rows)).map_err(output_error)?;
    tracing::debug!(count = rows.len(), path = %out_path.display(), "cookies written");

    Ok(ExportCookiesOutput {
        output_path: out_path.display().to_string(),
        cookie_count: rows.len(),
    })
}
