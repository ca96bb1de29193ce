//! `deploy.compose`: pull and restart Docker Compose services over SSH.

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde::{Deserialize, Serialize};
use toolbox_core::DomainError;

/// Capability name
pub const NAME: &str = "deploy.compose";

const SSH_BATCH_OPTIONS: [&str; 4] = ["-o", "BatchMode=yes", "-o", "ConnectTimeout=10"];

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct DeployInput {
    /// SSH destination, e.g. `user@host`
    pub host: String,
    /// Directory holding `compose.yaml` on the remote host
    pub compose_dir: String,
    /// Services to act on; all when empty
    #[serde(default)]
    pub services: Vec<String>,
    /// Pull images without restarting
    #[serde(default)]
    pub pull_only: bool,
    /// Return the command instead of running it
    #[serde(default)]
    pub dry_run: bool,
}

/// What was done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    /// Nothing run
    DryRun,
    /// `docker compose pull` only
    Pulled,
    /// Pull then `up -d`
    Deployed,
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutput {
    /// SSH destination
    pub host: String,
    /// Remote compose directory
    pub compose_dir: String,
    /// Services acted on, `["(all)"]` when none were named
    pub services: Vec<String>,
    /// Action taken
    pub action: DeployAction,
    /// Full ssh argv, for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_command: Option<Vec<String>>,
    /// Remote exit code, for real runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// ssh missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Connection or remote command failed
    #[error("{0}")]
    Ssh(String),
}

impl DomainError for DeployError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Ssh(_) => "ssh_error",
        }
    }
}

/// Shell command run on the remote host
#[must_use]
pub fn remote_command(compose_dir: &str, services: &[String], pull_only: bool) -> String {
    let with_services = |base: &str| {
        std::iter::once(base.to_string())
            .chain(services.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    };
    let pull = with_services("docker compose pull");
    if pull_only {
        return format!("cd {compose_dir} && {pull}");
    }
    let up = with_services("docker compose up -d");
    format!("cd {compose_dir} && {pull} && {up}")
}

/// Run the deployment
///
/// # Errors
///
/// Returns `dependency_error` without ssh and `ssh_error` on a non-zero exit
pub fn deploy_compose(
    runner: &dyn CommandRunner,
    input: DeployInput,
) -> Result<DeployOutput, DeployError> {
    process::require(runner, "ssh")?;

    let remote = remote_command(&input.compose_dir, &input.services, input.pull_only);
    let spec = CommandSpec::new("ssh")
        .args(SSH_BATCH_OPTIONS)
        .arg(input.host.as_str())
        .arg(remote);
    let services = if input.services.is_empty() {
        vec!["(all)".to_string()]
    } else {
        input.services.clone()
    };

    if input.dry_run {
        return Ok(DeployOutput {
            host: input.host,
            compose_dir: input.compose_dir,
            services,
            action: DeployAction::DryRun,
            ssh_command: Some(spec.argv()),
            exit_code: None,
        });
    }

    tracing::info!(host = %input.host, compose_dir = %input.compose_dir, "deploying compose stack");
    let output = process::run(runner, &spec)?;
    if !output.success() {
        return Err(DeployError::Ssh(output.error_message("remote command failed")));
    }

    Ok(DeployOutput {
        host: input.host,
        compose_dir: input.compose_dir,
        services,
        action: if input.pull_only {
            DeployAction::Pulled
        } else {
            DeployAction::Deployed
        },
        ssh_command: None,
        exit_code: output.status,
    })
}
