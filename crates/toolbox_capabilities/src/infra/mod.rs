//! Docker host management: managed instances, static stacks, fleet health
//! and VM preflight.
//!
//! Commands are shell snippets run through a [`Target`]: `sh -c` on this
//! machine, or the remote host's login shell over ssh. Anything interpolated
//! into a snippet is quoted with [`quote`] or checked with [`validate_name`].

pub mod bootstrap;
pub mod fleet;
pub mod instances;
pub mod stacks;

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde::Serialize;
use serde_json::Value;
use toolbox_core::{DomainError, ErrorCode};

/// Host value meaning "this machine"
pub const LOCAL_HOST: &str = "local";

/// Options that keep ssh from prompting or hanging
pub const SSH_BATCH_OPTIONS: [&str; 4] = ["-o", "BatchMode=yes", "-o", "ConnectTimeout=10"];

/// Default root for stacks and templates
pub const DEFAULT_BASE_DIR: &str = "/opt";

pub(crate) fn default_base_dir() -> String {
    DEFAULT_BASE_DIR.to_string()
}

pub(crate) fn default_host() -> String {
    LOCAL_HOST.to_string()
}

/// Errors shared by the infra capabilities
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    /// Binary missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Name would be unsafe as a path component or project name
    #[error("Invalid {kind} name: {value:?}")]
    InvalidName {
        /// What the name is for
        kind: &'static str,
        /// Rejected value
        value: String,
    },
    /// Connection or remote command failed
    #[error("{0}")]
    Ssh(String),
    /// `docker compose` exited non-zero
    #[error("{0}")]
    Compose(String),
    /// Local command exited non-zero
    #[error("{0}")]
    Command(String),
}

impl DomainError for InfraError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::InvalidName { .. } => ErrorCode::ValidationError.as_str(),
            Self::Ssh(_) => "ssh_error",
            Self::Compose(_) => "compose_error",
            Self::Command(_) => "command_error",
        }
    }
}

/// Where commands run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// This machine
    Local,
    /// SSH destination
    Remote(String),
}

impl Target {
    /// `"local"` is this machine; anything else is an ssh destination
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        if host == LOCAL_HOST {
            Self::Local
        } else {
            Self::Remote(host.to_string())
        }
    }

    /// Host label for output
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Local => LOCAL_HOST,
            Self::Remote(host) => host,
        }
    }

    /// Check ssh for remote targets, `local_binary` otherwise
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Missing`] if the binary is not on `PATH`
    pub fn require(&self, runner: &dyn CommandRunner, local_binary: Option<&str>) -> Result<(), ProcessError> {
        match (self, local_binary) {
            (Self::Remote(_), _) => process::require(runner, "ssh").map(drop),
            (Self::Local, Some(binary)) => process::require(runner, binary).map(drop),
            (Self::Local, None) => Ok(()),
        }
    }

    /// Command running `script` on this target
    #[must_use]
    pub fn command(&self, script: &str) -> CommandSpec {
        match self {
            Self::Local => CommandSpec::shell(script),
            Self::Remote(host) => ssh(host, script),
        }
    }

    /// Error for a failed command on this target
    #[must_use]
    pub fn failure(&self, message: String) -> InfraError {
        match self {
            Self::Local => InfraError::Command(message),
            Self::Remote(_) => InfraError::Ssh(message),
        }
    }
}

/// `ssh` in batch mode running `remote` on `host`
#[must_use]
pub fn ssh(host: &str, remote: &str) -> CommandSpec {
    CommandSpec::new("ssh").args(SSH_BATCH_OPTIONS).arg(host).arg(remote)
}

/// Quote one word for a POSIX shell
#[must_use]
pub fn quote(word: &str) -> String {
    shell_words::quote(word).into_owned()
}

/// Quote and space-join `words`
#[must_use]
pub fn quote_all(words: &[String]) -> String {
    words.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" ")
}

/// Accept only `[A-Za-z0-9._-]+`
///
/// # Errors
///
/// Returns [`InfraError::InvalidName`] for anything else
pub fn validate_name(kind: &'static str, value: &str) -> Result<(), InfraError> {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if safe {
        Ok(())
    } else {
        Err(InfraError::InvalidName {
            kind,
            value: value.to_string(),
        })
    }
}

/// One JSON object per line; unparseable lines are skipped
#[must_use]
pub fn parse_json_lines(raw: &str) -> Vec<Value> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// `docker compose ps --format json` output
///
/// Older Compose prints one array, newer prints one object per line.
#[must_use]
pub fn parse_compose_ps(raw: &str) -> Vec<Value> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(object @ Value::Object(_)) => vec![object],
        _ => parse_json_lines(raw),
    }
}

/// Empty strings, zero, false, null and empty collections
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// First non-blank value among `keys`
pub(crate) fn first_present<'a>(object: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !is_blank(value))
}

pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_field(object: &Value, keys: &[&str], fallback: &str) -> String {
    first_present(object, keys).map_or_else(|| fallback.to_string(), text_of)
}

/// One Compose service, normalized across Compose versions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    /// Container name
    pub name: String,
    /// Compose service
    pub service: String,
    /// `State`, else `Status`
    pub status: String,
    /// Health check result, empty without one
    pub health: String,
    /// `Publishers` list or `Ports` string
    pub ports: Value,
    /// Image reference
    pub image: String,
}

impl ServiceState {
    /// Normalize a raw `ps` entry
    #[must_use]
    pub fn from_ps(entry: &Value) -> Self {
        Self {
            name: text_field(entry, &["Name", "Service", "name"], "unknown"),
            service: text_field(entry, &["Service", "service"], ""),
            status: text_field(entry, &["State", "Status", "status"], "unknown"),
            health: text_field(entry, &["Health", "health"], ""),
            ports: first_present(entry, &["Publishers", "Ports", "ports"])
                .cloned()
                .unwrap_or_else(|| Value::String(String::new())),
            image: text_field(entry, &["Image", "image"], ""),
        }
    }
}

/// Trimmed stderr, else trimmed stdout, else `fallback`
pub(crate) fn output_message(output: &process::CommandOutput, fallback: &str) -> String {
    let stdout = output.stdout.trim();
    if output.stderr.trim().is_empty() && !stdout.is_empty() {
        stdout.to_string()
    } else {
        output.error_message(fallback)
    }
}

/// At most `max` characters
pub(crate) fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
