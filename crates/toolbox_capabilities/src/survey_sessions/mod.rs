//! `claude.survey_sessions`: list Claude sessions from the local CLI store,
//! claude.ai Code and claude.ai chat, and optionally export transcripts.
//!
//! CLI sessions are the JSONL files under `<claude_dir>/projects/<project>/`.
//! Web sources need an organization id and a session cookie; without them
//! they are skipped with a warning. Web requests go through curl.

mod local;
mod web;

use crate::paths;
use crate::process::{self, CommandRunner, ProcessError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use toolbox_core::DomainError;

pub use local::{Transcript, cli_sessions, cli_transcript};
pub use web::{Chat, Conversation, WebClient, WebError, chat_sessions, code_sessions, parse_events};

/// Capability name
pub const NAME: &str = "claude.survey_sessions";

const ORG_ENV: &str = "CLAUDE_ORG_ID";
const COOKIE_ENV: &str = "CLAUDE_SESSION_COOKIE";
const DEFAULT_CLAUDE_DIR: &str = "~/.claude";
const UNTITLED: &str = "untitled";

/// Sources a caller can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Local CLI transcripts
    Cli,
    /// claude.ai Code sessions
    Code,
    /// claude.ai chat conversations
    Chat,
}

impl SourceKind {
    fn label(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Code => "code",
            Self::Chat => "chat",
        }
    }
}

fn default_sources() -> Vec<SourceKind> {
    vec![SourceKind::Cli, SourceKind::Code, SourceKind::Chat]
}

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct SurveyInput {
    /// Sources to read
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceKind>,
    /// claude.ai organization id, `CLAUDE_ORG_ID` when absent
    #[serde(default)]
    pub org_id: Option<String>,
    /// claude.ai `Cookie` header, `CLAUDE_SESSION_COOKIE` when absent
    #[serde(default)]
    pub cookie: Option<String>,
    /// Keep Code sessions with this status only
    #[serde(default)]
    pub status_filter: Option<String>,
    /// Keep sessions whose id contains this
    #[serde(default)]
    pub session_id: Option<String>,
    /// Write one JSON transcript per session
    #[serde(default)]
    pub export: bool,
    /// Export directory, `<claude_dir>/exports` when absent
    #[serde(default)]
    pub export_dir: Option<String>,
    /// Claude home, `~/.claude` when absent
    #[serde(default)]
    pub claude_dir: Option<String>,
}

/// Where a session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Local CLI
    Cli,
    /// claude.ai Code
    Web,
    /// claude.ai chat
    Chat,
}

impl SessionSource {
    fn label(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Web => "web",
            Self::Chat => "chat",
        }
    }
}

/// One session, whatever its source
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct Session {
    pub source: SessionSource,
    pub session_id: String,
    pub project: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub model: Option<String>,
    pub branch: Option<String>,
    pub slug: Option<String>,
    pub cwd: Option<String>,
    pub repo: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub message_count: Option<u64>,
    pub size_mb: Option<f64>,
    pub version: Option<String>,
}

impl Session {
    pub(crate) fn remote(source: SessionSource, session_id: String, status: String) -> Self {
        Self {
            source,
            session_id,
            project: None,
            title: None,
            status,
            model: None,
            branch: None,
            slug: None,
            cwd: None,
            repo: None,
            created_at: None,
            updated_at: None,
            message_count: None,
            size_mb: None,
            version: None,
        }
    }
}

/// Session counts per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Local CLI sessions
    pub cli: usize,
    /// claude.ai Code sessions
    pub code: usize,
    /// claude.ai chats
    pub chat: usize,
    /// All sessions
    pub total: usize,
}

impl Summary {
    fn of(sessions: &[Session]) -> Self {
        let count = |source: SessionSource| sessions.iter().filter(|s| s.source == source).count();
        Self {
            cli: count(SessionSource::Cli),
            code: count(SessionSource::Web),
            chat: count(SessionSource::Chat),
            total: sessions.len(),
        }
    }
}

/// Output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyOutput {
    /// Sessions after filtering
    pub sessions: Vec<Session>,
    /// Counts
    pub summary: Summary,
    /// Files written, when exporting
    pub exported_files: Option<Vec<String>>,
    /// Skipped sources and failed requests
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum SurveyError {
    /// curl missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Export directory or file could not be written
    #[error("cannot write {path}: {source}")]
    Export {
        /// File or directory
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl DomainError for SurveyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Export { .. } => "export_error",
        }
    }
}

fn non_empty(value: Option<String>, env: &str) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| std::env::var(env).ok().filter(|v| !v.trim().is_empty()))
}

/// `s` cut to `max` characters, with `...` when cut
pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

/// File-name-safe form of a title: first line, 50 chars
#[must_use]
pub fn safe_title(title: Option<&str>) -> String {
    let first = title.unwrap_or(UNTITLED).lines().next().unwrap_or("");
    first
        .chars()
        .take(50)
        .map(|c| if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') { c } else { '_' })
        .collect::<String>()
        .trim()
        .to_string()
}

fn export_name(session: &Session) -> String {
    let sid: String = session.session_id.chars().take(40).collect();
    format!(
        "{}_{sid}_{}.json",
        session.source.label(),
        safe_title(session.title.as_deref())
    )
}

fn export_document(session: &Session, projects: &Path, web: Option<&WebClient<'_>>) -> Option<Value> {
    match session.source {
        SessionSource::Cli => {
            let project = session.project.as_deref().unwrap_or("unknown");
            let path = projects.join(project).join(format!("{}.jsonl", session.session_id));
            let transcript = cli_transcript(&path).ok()?;
            let meta = |own: &Option<String>, key: &str| {
                own.clone()
                    .map(Value::String)
                    .or_else(|| transcript.metadata.get(key).cloned())
                    .unwrap_or(Value::Null)
            };
            Some(json!({
                "source": "cli",
                "session_id": session.session_id,
                "project": project,
                "title": session.title,
                "branch": meta(&session.branch, "branch"),
                "cwd": meta(&session.cwd, "cwd"),
                "version": meta(&session.version, "version"),
                "created_at": session.created_at,
                "updated_at": session.updated_at,
                "message_count": session.message_count,
                "conversation": transcript.messages,
                "result_summary": Value::Null,
            }))
        }
        SessionSource::Web => {
            let events = web?.session_events(&session.session_id);
            if events.is_empty() {
                return None;
            }
            let conversation = parse_events(&events);
            Some(json!({
                "source": "web",
                "session_id": session.session_id,
                "title": session.title,
                "status": session.status,
                "model": session.model,
                "repo": session.repo,
                "branch": session.branch,
                "created_at": session.created_at,
                "updated_at": session.updated_at,
                "conversation": conversation.messages,
                "result_summary": conversation.result,
                "raw_event_count": events.len(),
            }))
        }
        SessionSource::Chat => {
            let chat = web?.chat_conversation(&session.session_id).ok()?;
            if chat.messages.is_empty() {
                return None;
            }
            Some(json!({
                "source": "chat",
                "session_id": session.session_id,
                "title": session.title,
                "model": session.model.clone().or(chat.model),
                "created_at": session.created_at,
                "updated_at": session.updated_at,
                "summary": chat.summary,
                "conversation": chat.messages,
                "result_summary": Value::Null,
            }))
        }
    }
}

fn export_sessions(
    sessions: &[Session],
    export_dir: &Path,
    projects: &Path,
    web: Option<&WebClient<'_>>,
) -> Result<Vec<String>, SurveyError> {
    std::fs::create_dir_all(export_dir).map_err(|source: std::io::Error| SurveyError::Export {
        path: export_dir.display().to_string(),
        source,
    })?;
    let mut written = Vec::new();
    for session in sessions {
        let Some(document) = export_document(session, projects, web) else {
            tracing::debug!(session = %session.session_id, "nothing to export");
            continue;
        };
        let path = export_dir.join(export_name(session));
        let export_error = |source: std::io::Error| SurveyError::Export {
            path: path.display().to_string(),
            source,
        };
        let text = serde_json::to_string_pretty(&document).map_err(|e| export_error(e.into()))?;
        std::fs::write(&path, text).map_err(export_error)?;
        written.push(path.display().to_string());
    }
    Ok(written)
}

/// Survey sessions and optionally export them
///
/// Failed web listings become warnings; only a missing curl or an
/// unwritable export directory fails the call.
///
/// # Errors
///
/// Returns `dependency_error` when web sources are authorized but curl is
/// missing, and `export_error` when an export cannot be written
pub fn survey_sessions(runner: &dyn CommandRunner, input: SurveyInput) -> Result<SurveyOutput, SurveyError> {
    let claude_dir: PathBuf = paths::absolute(&paths::expand_home(
        input.claude_dir.as_deref().unwrap_or(DEFAULT_CLAUDE_DIR),
    ));
    let projects = claude_dir.join("projects");
    let org_id = non_empty(input.org_id, ORG_ENV);
    let cookie = non_empty(input.cookie, COOKIE_ENV);
    let wants = |kind| input.sources.contains(&kind);

    let mut sessions: Vec<Session> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if wants(SourceKind::Cli) {
        sessions.extend(cli_sessions(&projects));
    }

    let web_kinds: Vec<SourceKind> = input
        .sources
        .iter()
        .copied()
        .filter(|k| matches!(k, SourceKind::Code | SourceKind::Chat))
        .collect();
    let client = match (&org_id, &cookie) {
        (Some(org_id), Some(cookie)) if !web_kinds.is_empty() => {
            process::require(runner, "curl")?;
            Some(WebClient::new(runner, org_id, cookie))
        }
        _ => None,
    };
    if !web_kinds.is_empty() {
        match &client {
            None => {
                let skipped: Vec<&str> = web_kinds.iter().map(|k| k.label()).collect();
                warnings.push(format!("Skipped {}: org_id and cookie required.", skipped.join(", ")));
            }
            Some(client) => {
                if wants(SourceKind::Code) {
                    match code_sessions(client) {
                        Ok(mut code) => {
                            if let Some(status) = &input.status_filter {
                                code.retain(|s| &s.status == status);
                            }
                            sessions.extend(code);
                        }
                        Err(err) => warnings.push(format!("code sessions unavailable: {err}")),
                    }
                }
                if wants(SourceKind::Chat) {
                    match chat_sessions(client) {
                        Ok(chat) => sessions.extend(chat),
                        Err(err) => warnings.push(format!("chat sessions unavailable: {err}")),
                    }
                }
            }
        }
    }

    if let Some(id) = input.session_id.as_deref().filter(|id| !id.is_empty()) {
        sessions.retain(|s| s.session_id.contains(id));
    }
    let summary = Summary::of(&sessions);
    tracing::info!(total = summary.total, cli = summary.cli, code = summary.code, chat = summary.chat, "sessions surveyed");

    let exported_files = if input.export {
        let export_dir = input
            .export_dir
            .as_deref()
            .map_or_else(|| claude_dir.join("exports"), |dir| paths::absolute(&paths::expand_home(dir)));
        Some(export_sessions(&sessions, &export_dir, &projects, client.as_ref())?)
    } else {
        None
    };

    Ok(SurveyOutput {
        sessions,
        summary,
        exported_files,
        warnings,
    })
}
