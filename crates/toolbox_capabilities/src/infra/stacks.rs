//! Static Compose stacks: one directory per stack under a base dir, each with
//! a `docker-compose.yml`.
//!
//! `infra.stack_status` inspects a remote host over ssh; the rest run on this
//! machine.

use super::{
    DEFAULT_BASE_DIR, InfraError, ServiceState, Target, default_base_dir, parse_compose_ps, parse_json_lines,
    quote, quote_all, validate_name,
};
use crate::process::{self, CommandRunner};
use serde::{Deserialize, Serialize};

/// Remote status capability name
pub const STATUS_NAME: &str = "infra.stack_status";
/// Local status capability name
pub const CHECK_NAME: &str = "infra.check_stack";
/// Deploy capability name
pub const DEPLOY_NAME: &str = "infra.deploy_stack";
/// Teardown capability name
pub const DESTROY_NAME: &str = "infra.destroy_stack";
/// Scan capability name
pub const DISCOVER_NAME: &str = "infra.discover_stacks";

/// Input for `infra.stack_status`
#[derive(Debug, Clone, Deserialize)]
pub struct StackStatusInput {
    /// SSH destination
    pub host: String,
    /// Compose project directory on the host
    pub compose_dir: String,
    /// Services to query; all when empty
    #[serde(default)]
    pub services: Vec<String>,
}

/// Input for `infra.check_stack`
#[derive(Debug, Clone, Deserialize)]
pub struct CheckStackInput {
    /// Compose project directory
    pub compose_dir: String,
    /// Services to query; all when empty
    #[serde(default)]
    pub services: Vec<String>,
}

/// Service listing, or the failed command's message
///
/// A failing `docker compose ps` is reported in the result rather than as an
/// error so callers can tell "host unreachable" from "stack down".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackStatusOutput {
    /// SSH destination, remote checks only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Compose project directory
    pub compose_dir: String,
    /// Number of services listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_count: Option<usize>,
    /// Normalized services
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceState>>,
    /// Command failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code of the failed command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

fn ps_script(compose_dir: &str, services: &[String]) -> String {
    let script = format!("cd {} && docker compose ps --format json {}", quote(compose_dir), quote_all(services));
    script.trim_end().to_string()
}

fn compose_status(
    runner: &dyn CommandRunner,
    target: &Target,
    compose_dir: String,
    services: &[String],
    fallback: &str,
) -> Result<StackStatusOutput, InfraError> {
    let output = process::run(runner, &target.command(&ps_script(&compose_dir, services)))?;
    let host = match target {
        Target::Local => None,
        Target::Remote(host) => Some(host.clone()),
    };

    if !output.success() {
        tracing::warn!(host = target.host(), compose_dir = %compose_dir, "compose ps failed");
        return Ok(StackStatusOutput {
            host,
            compose_dir,
            service_count: None,
            services: None,
            error: Some(output.error_message(fallback)),
            exit_code: output.status,
        });
    }

    let states: Vec<ServiceState> = parse_compose_ps(&output.stdout).iter().map(ServiceState::from_ps).collect();
    Ok(StackStatusOutput {
        host,
        compose_dir,
        service_count: Some(states.len()),
        services: Some(states),
        error: None,
        exit_code: None,
    })
}

/// Compose service status on a remote host
///
/// # Errors
///
/// Returns `dependency_error` without ssh
pub fn stack_status(runner: &dyn CommandRunner, input: StackStatusInput) -> Result<StackStatusOutput, InfraError> {
    process::require(runner, "ssh")?;
    let target = Target::Remote(input.host);
    compose_status(runner, &target, input.compose_dir, &input.services, "remote command failed")
}

/// Compose service status on this machine
///
/// # Errors
///
/// Returns `dependency_error` without docker
pub fn check_stack(runner: &dyn CommandRunner, input: CheckStackInput) -> Result<StackStatusOutput, InfraError> {
    process::require(runner, "docker")?;
    compose_status(runner, &Target::Local, input.compose_dir, &input.services, "command failed")
}

/// What was done to a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackAction {
    /// Nothing run
    DryRun,
    /// Images pulled only
    Pulled,
    /// Pulled then `up -d`
    Deployed,
    /// `down`
    Destroyed,
}

/// Input for `infra.deploy_stack`
#[derive(Debug, Clone, Deserialize)]
pub struct DeployStackInput {
    /// Directory name under `base_dir`
    pub stack: String,
    /// Services to act on; all when empty
    #[serde(default)]
    pub services: Vec<String>,
    /// Pull without restarting
    #[serde(default)]
    pub pull_only: bool,
    /// Return the command instead of running it
    #[serde(default)]
    pub dry_run: bool,
    /// Stack root
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

/// Output of `infra.deploy_stack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployStackOutput {
    /// Stack name
    pub stack: String,
    /// `base_dir/stack`
    pub compose_dir: String,
    /// Services acted on, `["(all)"]` when none were named
    pub services: Vec<String>,
    /// Action taken
    pub action: StackAction,
    /// Shell command, for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Exit code, for real runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

fn compose_dir(base_dir: &str, stack: &str) -> String {
    format!("{}/{stack}", base_dir.trim_end_matches('/'))
}

/// Shell command that pulls and optionally restarts a stack
#[must_use]
pub fn deploy_script(compose_dir: &str, services: &[String], pull_only: bool) -> String {
    let with_services = |base: &str| format!("{base} {}", quote_all(services)).trim_end().to_string();
    let pull = with_services("docker compose pull");
    if pull_only {
        return format!("cd {} && {pull}", quote(compose_dir));
    }
    format!("cd {} && {pull} && {}", quote(compose_dir), with_services("docker compose up -d"))
}

/// Pull and restart a stack on this machine
///
/// # Errors
///
/// Returns `validation_error` for an unsafe stack name, `dependency_error`
/// without docker and `compose_error` on a non-zero exit
pub fn deploy_stack(runner: &dyn CommandRunner, input: DeployStackInput) -> Result<DeployStackOutput, InfraError> {
    validate_name("stack", &input.stack)?;
    process::require(runner, "docker")?;

    let compose_dir = compose_dir(&input.base_dir, &input.stack);
    let script = deploy_script(&compose_dir, &input.services, input.pull_only);
    let services = if input.services.is_empty() {
        vec!["(all)".to_string()]
    } else {
        input.services
    };

    if input.dry_run {
        return Ok(DeployStackOutput {
            stack: input.stack,
            compose_dir,
            services,
            action: StackAction::DryRun,
            command: Some(script),
            exit_code: None,
        });
    }

    tracing::info!(stack = %input.stack, "deploying stack");
    let output = process::run(runner, &Target::Local.command(&script))?;
    if !output.success() {
        return Err(InfraError::Compose(output.error_message("command failed")));
    }
    Ok(DeployStackOutput {
        stack: input.stack,
        compose_dir,
        services,
        action: if input.pull_only {
            StackAction::Pulled
        } else {
            StackAction::Deployed
        },
        command: None,
        exit_code: output.status,
    })
}

/// Input for `infra.destroy_stack`
#[derive(Debug, Clone, Deserialize)]
pub struct DestroyStackInput {
    /// Directory name under `base_dir`
    pub stack: String,
    /// Also remove named volumes
    #[serde(default)]
    pub volumes: bool,
    /// Stack root
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

/// Output of `infra.destroy_stack`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestroyStackOutput {
    /// Stack name
    pub stack: String,
    /// `base_dir/stack`
    pub compose_dir: String,
    /// Always `destroyed`
    pub action: StackAction,
    /// Whether `-v` was passed
    pub volumes_removed: bool,
    /// Exit code
    pub exit_code: Option<i32>,
}

/// `docker compose down` a stack on this machine
///
/// # Errors
///
/// Returns `validation_error` for an unsafe stack name, `dependency_error`
/// without docker and `compose_error` on a non-zero exit
pub fn destroy_stack(runner: &dyn CommandRunner, input: DestroyStackInput) -> Result<DestroyStackOutput, InfraError> {
    validate_name("stack", &input.stack)?;
    process::require(runner, "docker")?;

    let compose_dir = compose_dir(&input.base_dir, &input.stack);
    let mut script = format!("cd {} && docker compose down", quote(&compose_dir));
    if input.volumes {
        script.push_str(" -v");
    }

    tracing::info!(stack = %input.stack, volumes = input.volumes, "destroying stack");
    let output = process::run(runner, &Target::Local.command(&script))?;
    if !output.success() {
        return Err(InfraError::Compose(output.error_message("command failed")));
    }
    Ok(DestroyStackOutput {
        stack: input.stack,
        compose_dir,
        action: StackAction::Destroyed,
        volumes_removed: input.volumes,
        exit_code: output.status,
    })
}

/// Input for `infra.discover_stacks`
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverStacksInput {
    /// Directory to scan
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

impl Default for DiscoverStacksInput {
    fn default() -> Self {
        Self {
            base_dir: DEFAULT_BASE_DIR.to_string(),
        }
    }
}

/// A directory holding `docker-compose.yml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackInfo {
    /// Directory name
    pub name: String,
    /// `docker-compose.override.yml` present
    pub has_override: bool,
    /// `.env` present
    pub has_env: bool,
    /// `docker-compose.template.yml` present
    pub has_template: bool,
    /// `running` when `compose ps` lists anything, else `stopped`
    pub status: String,
}

/// Output of `infra.discover_stacks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverStacksOutput {
    /// Directory scanned
    pub base_dir: String,
    /// Number of stacks found
    pub stack_count: usize,
    /// Stacks in directory order
    pub stacks: Vec<StackInfo>,
}

/// Shell loop printing one JSON object per stack directory
#[must_use]
pub fn scan_script(base_dir: &str) -> String {
    format!(
        r#"cd {} 2>/dev/null || exit 1
for dir in */; do
    dir="${{dir%/}}"
    [ -f "$dir/docker-compose.yml" ] || continue
    has_override=false
    [ -f "$dir/docker-compose.override.yml" ] && has_override=true
    has_env=false
    [ -f "$dir/.env" ] && has_env=true
    has_template=false
    [ -f "$dir/docker-compose.template.yml" ] && has_template=true
    running=$(cd "$dir" && docker compose ps --format json 2>/dev/null | head -1)
    if [ -n "$running" ]; then status=running; else status=stopped; fi
    printf '{{"name":"%s","has_override":%s,"has_env":%s,"has_template":%s,"status":"%s"}}\n' \
        "$dir" "$has_override" "$has_env" "$has_template" "$status"
done
"#,
        quote(base_dir)
    )
}

/// List stack directories on this machine
///
/// # Errors
///
/// Returns `command_error` if the base dir cannot be entered
pub fn discover_stacks(
    runner: &dyn CommandRunner,
    input: DiscoverStacksInput,
) -> Result<DiscoverStacksOutput, InfraError> {
    let output = process::run(runner, &Target::Local.command(&scan_script(&input.base_dir)))?;
    if !output.success() {
        return Err(InfraError::Command(output.error_message("scan command failed")));
    }
    let stacks: Vec<StackInfo> = parse_json_lines(&output.stdout)
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    Ok(DiscoverStacksOutput {
        base_dir: input.base_dir,
        stack_count: stacks.len(),
        stacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use serde_json::json;
    use toolbox_core::DomainError;

    fn input<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_stack_status_over_ssh() {
        let ps = "{\"Name\":\"app-web-1\",\"Service\":\"web\",\"State\":\"running\",\"Health\":\"healthy\",\"Image\":\"nginx\"}\n\
                  {\"Name\":\"app-db-1\",\"Service\":\"db\",\"State\":\"exited\",\"Image\":\"postgres\"}\n";
        let runner = FakeRunner::with_binaries(&["ssh"]).respond(0, ps, "");
        let out = stack_status(
            &runner,
            input(json!({"host": "pi@box", "compose_dir": "/srv/app", "services": ["web", "db"]})),
        )
        .unwrap();
        assert_eq!(out.host.as_deref(), Some("pi@box"));
        assert_eq!(out.service_count, Some(2));
        let services = out.services.unwrap();
        assert_eq!(services[0].health, "healthy");
        assert_eq!(services[1].status, "exited");

        let call = &runner.calls()[0];
        assert_eq!(call.program, "ssh");
        assert_eq!(call.args.last().unwrap(), "cd /srv/app && docker compose ps --format json web db");
    }

    #[test]
    fn test_failed_ps_is_reported_not_raised() {
        let runner = FakeRunner::with_binaries(&["ssh"]).respond(255, "", "");
        let out = stack_status(&runner, input(json!({"host": "box", "compose_dir": "/srv"}))).unwrap();
        assert_eq!(out.error.as_deref(), Some("remote command failed"));
        assert_eq!(out.exit_code, Some(255));
        let value = serde_json::to_value(&out).unwrap();
        assert!(value.get("services").is_none());
        assert_eq!(value["host"], "box");
    }

    #[test]
    fn test_check_stack_runs_locally() {
        let runner = FakeRunner::with_binaries(&["docker"]).respond(0, "[{\"Service\":\"web\"}]", "");
        let out = check_stack(&runner, input(json!({"compose_dir": "/opt/my stack"}))).unwrap();
        assert!(out.host.is_none());
        assert_eq!(out.services.unwrap()[0].name, "web");
        assert_eq!(
            runner.calls()[0].argv(),
            vec!["sh", "-c", "cd '/opt/my stack' && docker compose ps --format json"]
        );
        let value = serde_json::to_value(check_stack(
            &FakeRunner::with_binaries(&["docker"]).respond(1, "", "no such file"),
            input(json!({"compose_dir": "/nope"})),
        )
        .unwrap())
        .unwrap();
        assert!(value.get("host").is_none());
        assert_eq!(value["error"], "no such file");
    }

    #[test]
    fn test_deploy_script() {
        assert_eq!(
            deploy_script("/opt/app", &[], false),
            "cd /opt/app && docker compose pull && docker compose up -d"
        );
        assert_eq!(
            deploy_script("/opt/app", &["web".to_string()], true),
            "cd /opt/app && docker compose pull web"
        );
    }

    #[test]
    fn test_deploy_stack_dry_run() {
        let runner = FakeRunner::with_binaries(&["docker"]);
        let out = deploy_stack(
            &runner,
            input(json!({"stack": "health-ledger", "services": ["api"], "dry_run": true, "base_dir": "/srv/"})),
        )
        .unwrap();
        assert_eq!(out.compose_dir, "/srv/health-ledger");
        assert_eq!(out.action, StackAction::DryRun);
        assert_eq!(
            out.command.as_deref(),
            Some("cd /srv/health-ledger && docker compose pull api && docker compose up -d api")
        );
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_deploy_stack_rejects_unsafe_name() {
        let runner = FakeRunner::with_binaries(&["docker"]);
        let err = deploy_stack(&runner, input(json!({"stack": "../etc"}))).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_deploy_stack_failure() {
        let runner = FakeRunner::with_binaries(&["docker"]).respond(1, "", "pull access denied\n");
        let err = deploy_stack(&runner, input(json!({"stack": "app", "pull_only": true}))).unwrap_err();
        assert_eq!(err.code(), "compose_error");
        assert_eq!(err.to_string(), "pull access denied");
    }

    #[test]
    fn test_destroy_stack() {
        let runner = FakeRunner::with_binaries(&["docker"]).respond(0, "", "");
        let out = destroy_stack(&runner, input(json!({"stack": "app", "volumes": true}))).unwrap();
        assert!(out.volumes_removed);
        assert_eq!(serde_json::to_value(&out).unwrap()["action"], "destroyed");
        assert_eq!(runner.calls()[0].args[1], "cd /opt/app && docker compose down -v");
    }

    #[test]
    fn test_discover_stacks_parses_lines() {
        let stdout = "{\"name\":\"app\",\"has_override\":false,\"has_env\":true,\"has_template\":false,\"status\":\"running\"}\n\
                      garbage\n\
                      {\"name\":\"job\",\"has_override\":true,\"has_env\":false,\"has_template\":true,\"status\":\"stopped\"}\n";
        let runner = FakeRunner::empty().respond(0, stdout, "");
        let out = discover_stacks(&runner, DiscoverStacksInput::default()).unwrap();
        assert_eq!(out.stack_count, 2);
        assert_eq!(out.stacks[1].name, "job");
        assert!(out.stacks[0].has_env);
        assert!(runner.calls()[0].args[1].starts_with("cd /opt 2>/dev/null || exit 1\n"));
    }

    #[test]
    fn test_discover_stacks_missing_base_dir() {
        let runner = FakeRunner::empty().respond(1, "", "");
        let err = discover_stacks(&runner, input(json!({"base_dir": "/nope"}))).unwrap_err();
        assert_eq!(err.code(), "command_error");
        assert_eq!(err.to_string(), "scan command failed");
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_script_against_real_tree() {
        let runner = crate::process::SystemRunner;
        if runner.locate("sh").is_none() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("app")).unwrap();
        std::fs::write(root.path().join("app/docker-compose.yml"), "services: {}\n").unwrap();
        std::fs::write(root.path().join("app/.env"), "A=1\n").unwrap();
        std::fs::create_dir_all(root.path().join("notes")).unwrap();

        let out = discover_stacks(
            &runner,
            DiscoverStacksInput {
                base_dir: root.path().display().to_string(),
            },
        )
        .unwrap();
        assert_eq!(out.stack_count, 1);
        assert_eq!(out.stacks[0].name, "app");
        assert!(out.stacks[0].has_env);
        assert!(!out.stacks[0].has_override);
    }
}
