//! `infra.bootstrap_vm`: preflight a VM before deploying the fleet to it.

use super::{InfraError, quote, ssh};
use crate::process::{self, CommandRunner};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Capability name
pub const NAME: &str = "infra.bootstrap_vm";

/// Compose directories checked when none are given
pub const DEFAULT_COMPOSE_DIRS: [&str; 3] = [
    "/opt/remarkable-pipeline",
    "/opt/health-ledger",
    "/opt/archi-mcp-bridge",
];

const GHCR_CHECK: &str = "python3 -c \"import json; d=json.load(open('/home/ubuntu/.docker/config.json')); \
     print('authenticated' if 'ghcr.io' in d.get('auths', {}) else 'unauthenticated')\" 2>/dev/null || echo unauthenticated";

const TAILSCALE_CHECK: &str = "tailscale status --self --json 2>/dev/null | python3 -c \"import sys, json; \
     d=json.load(sys.stdin); print('Online' if d.get('Online') or d.get('Self', {}).get('Online') else 'Offline')\" \
     2>/dev/null || tailscale status --self 2>/dev/null | head -1";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapInput {
    /// SSH destination
    pub host: String,
    /// Directories that must hold `docker-compose.yml` and `.env`
    #[serde(default)]
    pub compose_dirs: Option<Vec<String>>,
}

/// Check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Passed
    Ok,
    /// Failed
    Fail,
}

/// One preflight check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckDetail {
    /// Check name, e.g. `compose_dir:health-ledger`
    pub check: String,
    /// Outcome
    pub status: CheckStatus,
    /// Command output, or stderr on failure
    pub detail: String,
    /// How to fix a failure
    pub hint: String,
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapOutput {
    /// SSH destination
    pub host: String,
    /// Directories checked
    pub compose_dirs: Vec<String>,
    /// Every check passed
    pub all_ok: bool,
    /// Check name to status, in run order
    pub checks: IndexMap<String, CheckStatus>,
    /// Full results
    pub details: Vec<CheckDetail>,
}

type Accept = fn(&str) -> bool;

struct Check {
    name: String,
    command: String,
    accept: Option<Accept>,
    hint: String,
}

impl Check {
    fn new(name: impl Into<String>, command: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            accept: None,
            hint: hint.into(),
        }
    }

    fn accept(mut self, accept: Accept) -> Self {
        self.accept = Some(accept);
        self
    }
}

fn reports_exists(out: &str) -> bool {
    out.contains("exists")
}

fn checks_for(compose_dirs: &[String]) -> Vec<Check> {
    let mut checks = vec![
        Check::new(
            "docker",
            "docker --version",
            "Install Docker: https://docs.docker.com/engine/install/ubuntu/",
        ),
        Check::new("compose", "docker compose version", "Install Docker Compose plugin"),
        Check::new("arch", "uname -m", "Expected ARM64 architecture")
            .accept(|out| out.contains("aarch64") || out.contains("arm64")),
        Check::new(
            "ghcr",
            GHCR_CHECK,
            "Authenticate: echo $GHCR_TOKEN | docker login ghcr.io -u <user> --password-stdin",
        )
        .accept(|out| out.trim() == "authenticated"),
        Check::new("tailscale", TAILSCALE_CHECK, "Start Tailscale: sudo tailscale up")
            .accept(|out| out.to_lowercase().contains("online")),
    ];
    for dir in compose_dirs {
        let trimmed = dir.trim_end_matches('/');
        let label = trimmed.rsplit('/').next().unwrap_or(trimmed);
        checks.push(
            Check::new(
                format!("compose_dir:{label}"),
                format!("test -f {} && echo exists", quote(&format!("{trimmed}/docker-compose.yml"))),
                format!("Create {trimmed}/ with docker-compose.yml"),
            )
            .accept(reports_exists),
        );
        checks.push(
            Check::new(
                format!("env_file:{label}"),
                format!("test -f {} && echo exists", quote(&format!("{trimmed}/.env"))),
                format!("Create {trimmed}/.env from .env.example"),
            )
            .accept(reports_exists),
        );
    }
    checks
}

fn run_check(runner: &dyn CommandRunner, host: &str, check: Check) -> Result<CheckDetail, InfraError> {
    let output = process::run(runner, &ssh(host, &check.command))?;
    let stdout = output.stdout.trim().to_string();
    let (status, detail) = if !output.success() {
        (CheckStatus::Fail, output.error_message("command failed"))
    } else if check.accept.is_some_and(|accept| !accept(&stdout)) {
        (CheckStatus::Fail, stdout)
    } else {
        (CheckStatus::Ok, stdout)
    };
    Ok(CheckDetail {
        check: check.name,
        status,
        detail,
        hint: check.hint,
    })
}

/// Run every preflight check over ssh
///
/// A failed check is reported, not raised; only a missing ssh is an error.
///
/// # Errors
///
/// Returns `dependency_error` without ssh
pub fn bootstrap_vm(runner: &dyn CommandRunner, input: BootstrapInput) -> Result<BootstrapOutput, InfraError> {
    process::require(runner, "ssh")?;
    let compose_dirs = input
        .compose_dirs
        .unwrap_or_else(|| DEFAULT_COMPOSE_DIRS.iter().map(|d| (*d).to_string()).collect());

    let details = checks_for(&compose_dirs)
        .into_iter()
        .map(|check| run_check(runner, &input.host, check))
        .collect::<Result<Vec<_>, _>>()?;
    let checks: IndexMap<String, CheckStatus> = details.iter().map(|d| (d.check.clone(), d.status)).collect();
    let all_ok = details.iter().all(|d| d.status == CheckStatus::Ok);
    tracing::info!(host = %input.host, all_ok, "bootstrap preflight finished");

    Ok(BootstrapOutput {
        host: input.host,
        compose_dirs,
        all_ok,
        checks,
        details,
    })
}
