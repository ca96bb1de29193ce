//! Managed instances: Compose projects spawned from a stack's
//! `docker-compose.template.yml`.
//!
//! Containers carry `toolbox.managed=true` and `toolbox.type=<template>`
//! labels; the Compose project name is `<template>-<name>`.

use super::{
    InfraError, Target, default_base_dir, default_host, output_message, parse_json_lines, quote, text_of,
    validate_name,
};
use crate::process::{self, CommandRunner, CommandSpec};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// List capability name
pub const LIST_NAME: &str = "infra.list_instances";
/// Spawn capability name
pub const SPAWN_NAME: &str = "infra.spawn_instance";
/// Destroy capability name
pub const DESTROY_NAME: &str = "infra.destroy_instance";
/// Cleanup capability name
pub const CLEANUP_NAME: &str = "infra.cleanup_instances";
/// Template scan capability name
pub const TEMPLATES_NAME: &str = "infra.discover_templates";

/// Compose file each template directory provides
pub const TEMPLATE_FILE: &str = "docker-compose.template.yml";

const MANAGED_LABEL: &str = "label=toolbox.managed=true";
const SPAWN_HINT: &str = "Call gateway_reload to make MCP tools available.";
const DESTROY_HINT: &str = "Call gateway_reload to remove stale MCP services.";
const TEMPLATE_MARKER: &str = "===TEMPLATE:";
const MARKER_END: &str = "===";

static ENV_REFERENCE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*?)(?::?-[^}]*)?\}"));

/// Input for `infra.list_instances`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListInstancesInput {
    /// Only instances of this template
    #[serde(default)]
    pub template: Option<String>,
}

/// One container of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceContainer {
    /// Container name
    pub name: String,
    /// `State`, else `Status`
    pub status: String,
    /// Image reference
    pub image: String,
}

/// Containers sharing a Compose project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    /// Compose project
    pub project_name: String,
    /// `toolbox.type` label
    #[serde(rename = "type")]
    pub template_type: String,
    /// First non-empty `mcp.namespace` label
    pub mcp_namespace: String,
    /// Member containers
    pub containers: Vec<InstanceContainer>,
}

/// Output of `infra.list_instances`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListInstancesOutput {
    /// Template filter applied
    pub filter_template: Option<String>,
    /// Number of projects
    pub instance_count: usize,
    /// Projects in first-seen order
    pub instances: Vec<Instance>,
}

/// `k=v,k=v` label string from `docker ps --format json`
fn parse_labels(raw: &str) -> BTreeMap<&str, &str> {
    raw.split(',').filter_map(|pair| pair.split_once('=')).collect()
}

fn field(entry: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| entry.get(*key))
        .map_or_else(|| "unknown".to_string(), text_of)
}

/// Group `docker ps` entries by Compose project
#[must_use]
pub fn group_by_project(entries: &[Value]) -> Vec<Instance> {
    let mut instances: Vec<Instance> = Vec::new();
    for entry in entries {
        let labels = parse_labels(entry.get("Labels").and_then(Value::as_str).unwrap_or_default());
        let project = labels.get("com.docker.compose.project").copied().unwrap_or("unknown");
        let namespace = labels.get("mcp.namespace").copied().unwrap_or_default();

        let position = match instances.iter().position(|i| i.project_name == project) {
            Some(index) => index,
            None => {
                instances.push(Instance {
                    project_name: project.to_string(),
                    template_type: labels.get("toolbox.type").copied().unwrap_or("unknown").to_string(),
                    mcp_namespace: String::new(),
                    containers: Vec::new(),
                });
                instances.len() - 1
            }
        };
        let instance = &mut instances[position];
        if instance.mcp_namespace.is_empty() {
            instance.mcp_namespace = namespace.to_string();
        }
        instance.containers.push(InstanceContainer {
            name: field(entry, &["Names"]),
            status: field(entry, &["State", "Status"]),
            image: field(entry, &["Image"]),
        });
    }
    instances
}

/// Running managed instances on this machine
///
/// # Errors
///
/// Returns `validation_error` for an unsafe template, `dependency_error`
/// without docker and `command_error` if `docker ps` fails
pub fn list_instances(
    runner: &dyn CommandRunner,
    input: ListInstancesInput,
) -> Result<ListInstancesOutput, InfraError> {
    if let Some(template) = &input.template {
        validate_name("template", template)?;
    }
    process::require(runner, "docker")?;

    let mut spec = CommandSpec::new("docker").args(["ps", "--filter", MANAGED_LABEL]);
    if let Some(template) = &input.template {
        spec = spec.arg("--filter").arg(format!("label=toolbox.type={template}"));
    }
    let spec = spec.args(["--format", "json", "--no-trunc"]);

    let output = process::run(runner, &spec)?;
    if !output.success() {
        return Err(InfraError::Command(output.error_message("docker ps failed")));
    }
    let instances = group_by_project(&parse_json_lines(&output.stdout));
    Ok(ListInstancesOutput {
        filter_template: input.template,
        instance_count: instances.len(),
        instances,
    })
}

/// Input for `infra.spawn_instance`
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnInstanceInput {
    /// Template directory under `base_dir`
    pub template: String,
    /// Instance name, exported as `NAME`
    pub name: String,
    /// `local` or an ssh destination
    #[serde(default = "default_host")]
    pub host: String,
    /// Extra variables for the template
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Template root
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

/// Output of `infra.spawn_instance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnInstanceOutput {
    /// `local` or the ssh destination
    pub host: String,
    /// Template used
    pub template: String,
    /// Instance name
    pub name: String,
    /// `<template>-<name>`
    pub project_name: String,
    /// Always `spawned`
    pub action: &'static str,
    /// Exit code
    pub exit_code: Option<i32>,
    /// Follow-up for MCP clients
    pub hint: &'static str,
}

fn template_dir(base_dir: &str, template: &str) -> String {
    format!("{}/{template}", base_dir.trim_end_matches('/'))
}

/// Compose command that brings an instance up
///
/// Locally the variables go into the child environment; remotely they are
/// prefixed to the command as quoted assignments.
#[must_use]
pub fn spawn_command(target: &Target, dir: &str, project: &str, env: &BTreeMap<String, String>) -> CommandSpec {
    match target {
        Target::Local => env.iter().fold(
            CommandSpec::new("docker").args([
                "compose".to_string(),
                "-f".to_string(),
                format!("{dir}/{TEMPLATE_FILE}"),
                "-p".to_string(),
                project.to_string(),
                "up".to_string(),
                "-d".to_string(),
            ]),
            |spec, (key, value)| spec.env(key.as_str(), value.as_str()),
        ),
        Target::Remote(_) => {
            let exports = env
                .iter()
                .map(|(key, value)| format!("{key}={}", quote(value)))
                .collect::<Vec<_>>()
                .join(" ");
            target.command(&format!(
                "cd {} && {exports} docker compose -f {TEMPLATE_FILE} -p {} up -d",
                quote(dir),
                quote(project)
            ))
        }
    }
}

/// Start a new instance of a template
///
/// # Errors
///
/// Returns `validation_error` for unsafe names, `dependency_error` without
/// ssh or docker and `compose_error` if `compose up` fails
pub fn spawn_instance(
    runner: &dyn CommandRunner,
    input: SpawnInstanceInput,
) -> Result<SpawnInstanceOutput, InfraError> {
    let target = Target::from_host(&input.host);
    validate_name("template", &input.template)?;
    validate_name("instance", &input.name)?;
    target.require(runner, Some("docker"))?;

    let project_name = format!("{}-{}", input.template, input.name);
    let mut env = input.env;
    env.insert("NAME".to_string(), input.name.clone());
    for key in env.keys() {
        validate_env_key(key)?;
    }

    let dir = template_dir(&input.base_dir, &input.template);
    tracing::info!(host = target.host(), project = %project_name, "spawning instance");
    let output = process::run(runner, &spawn_command(&target, &dir, &project_name, &env))?;
    if !output.success() {
        return Err(InfraError::Compose(output_message(&output, "compose up failed")));
    }

    Ok(SpawnInstanceOutput {
        host: input.host,
        template: input.template,
        name: input.name,
        project_name,
        action: "spawned",
        exit_code: output.status,
        hint: SPAWN_HINT,
    })
}

fn validate_env_key(key: &str) -> Result<(), InfraError> {
    let valid = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(InfraError::InvalidName {
            kind: "variable",
            value: key.to_string(),
        })
    }
}

/// Input for `infra.destroy_instance`
#[derive(Debug, Clone, Deserialize)]
pub struct DestroyInstanceInput {
    /// Compose project
    pub project: String,
    /// Also remove named volumes
    #[serde(default)]
    pub volumes: bool,
}

/// Output of `infra.destroy_instance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestroyInstanceOutput {
    /// Compose project
    pub project: String,
    /// Always `destroyed`
    pub action: &'static str,
    /// Whether `-v` was passed
    pub volumes_removed: bool,
    /// Exit code
    pub exit_code: Option<i32>,
    /// Follow-up for MCP clients
    pub hint: &'static str,
}

/// Tear down an instance on this machine
///
/// # Errors
///
/// Returns `validation_error` for an unsafe project, `dependency_error`
/// without docker and `compose_error` if `compose down` fails
pub fn destroy_instance(
    runner: &dyn CommandRunner,
    input: DestroyInstanceInput,
) -> Result<DestroyInstanceOutput, InfraError> {
    validate_name("project", &input.project)?;
    process::require(runner, "docker")?;

    let mut spec = CommandSpec::new("docker").args(["compose", "-p", input.project.as_str(), "down"]);
    if input.volumes {
        spec = spec.arg("-v");
    }
    tracing::info!(project = %input.project, volumes = input.volumes, "destroying instance");
    let output = process::run(runner, &spec)?;
    if !output.success() {
        return Err(InfraError::Compose(output.error_message("compose down failed")));
    }
    Ok(DestroyInstanceOutput {
        project: input.project,
        action: "destroyed",
        volumes_removed: input.volumes,
        exit_code: output.status,
        hint: DESTROY_HINT,
    })
}

/// Input for `infra.cleanup_instances`
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupInput {
    /// `local` or an ssh destination
    #[serde(default = "default_host")]
    pub host: String,
    /// List without removing
    #[serde(default)]
    pub dry_run: bool,
}

/// A stopped managed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedContainer {
    /// Container id
    pub id: String,
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Human status, e.g. `Exited (0) 2 days ago`
    pub status: String,
}

/// What cleanup did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupAction {
    /// Listed only
    DryRun,
    /// Nothing to remove
    None,
    /// `docker rm` ran
    Cleaned,
}

/// Output of `infra.cleanup_instances`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutput {
    /// `local` or the ssh destination
    pub host: String,
    /// Action taken
    pub action: CleanupAction,
    /// Containers listed or removed
    pub count: usize,
    /// Same containers
    pub containers: Vec<StoppedContainer>,
    /// `docker rm` exit code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

const STOPPED_QUERY: &str = "docker ps -a --filter \"label=toolbox.managed=true\" --filter \"status=exited\" \
     --filter \"status=dead\" --format \"{{.ID}} {{.Names}} {{.Image}} {{.Status}}\"";

/// `ID NAME IMAGE STATUS...` lines; the status keeps its spaces
#[must_use]
pub fn parse_stopped(stdout: &str) -> Vec<StoppedContainer> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let name = parts.next()?;
            let image = parts.next().unwrap_or("unknown");
            let status = parts.collect::<Vec<_>>().join(" ");
            Some(StoppedContainer {
                id: id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
                status: if status.is_empty() { "unknown".to_string() } else { status },
            })
        })
        .collect()
}

/// Remove stopped managed containers
///
/// # Errors
///
/// Returns `dependency_error` without ssh or docker, and `ssh_error` or
/// `command_error` if the listing fails
pub fn cleanup_instances(runner: &dyn CommandRunner, input: CleanupInput) -> Result<CleanupOutput, InfraError> {
    let target = Target::from_host(&input.host);
    target.require(runner, Some("docker"))?;

    let listing = process::run(runner, &target.command(STOPPED_QUERY))?;
    if !listing.success() {
        return Err(target.failure(listing.error_message("docker ps failed")));
    }
    let candidates = parse_stopped(&listing.stdout);

    if input.dry_run || candidates.is_empty() {
        return Ok(CleanupOutput {
            host: input.host,
            action: if input.dry_run {
                CleanupAction::DryRun
            } else {
                CleanupAction::None
            },
            count: candidates.len(),
            containers: candidates,
            exit_code: None,
        });
    }

    let ids: Vec<String> = candidates.iter().map(|c| quote(&c.id)).collect();
    tracing::info!(host = target.host(), count = candidates.len(), "removing stopped instances");
    let removal = process::run(runner, &target.command(&format!("docker rm {}", ids.join(" "))))?;
    let removed = if removal.success() { candidates } else { Vec::new() };
    Ok(CleanupOutput {
        host: input.host,
        action: CleanupAction::Cleaned,
        count: removed.len(),
        containers: removed,
        exit_code: removal.status,
    })
}

/// Input for `infra.discover_templates`
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverTemplatesInput {
    /// `local` or an ssh destination
    #[serde(default = "default_host")]
    pub host: String,
    /// Directory to scan
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
}

/// A spawnable template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    /// Directory name
    pub name: String,
    /// Full template path
    pub path: String,
    /// `${VAR}` references, sorted and unique
    pub env_vars: Vec<String>,
}

/// Output of `infra.discover_templates`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverTemplatesOutput {
    /// `local` or the ssh destination
    pub host: String,
    /// Directory scanned
    pub base_dir: String,
    /// Number of templates
    pub template_count: usize,
    /// Templates in directory order
    pub templates: Vec<TemplateInfo>,
}

/// Variables referenced as `${VAR}`, `${VAR-x}` or `${VAR:-x}`
///
/// # Errors
///
/// Returns error if the reference pattern fails to compile
pub fn env_references(content: &str) -> Result<Vec<String>, InfraError> {
    let pattern = ENV_REFERENCE
        .as_ref()
        .map_err(|e| InfraError::Command(format!("invalid variable pattern: {e}")))?;
    let names: BTreeSet<String> = pattern
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    Ok(names.into_iter().collect())
}

/// Shell loop printing each template behind a marker line
#[must_use]
pub fn templates_script(base_dir: &str) -> String {
    format!(
        r#"cd {} 2>/dev/null || exit 1
for dir in */; do
    dir="${{dir%/}}"
    tmpl="$dir/{TEMPLATE_FILE}"
    [ -f "$tmpl" ] || continue
    echo "{TEMPLATE_MARKER}$dir{MARKER_END}"
    cat "$tmpl"
done
"#,
        quote(base_dir)
    )
}

/// Split marker-delimited output into `(name, content)` pairs
#[must_use]
pub fn split_templates(stdout: &str) -> Vec<(String, String)> {
    let mut templates: Vec<(String, Vec<&str>)> = Vec::new();
    for line in stdout.lines() {
        let marker = line
            .strip_prefix(TEMPLATE_MARKER)
            .and_then(|rest| rest.strip_suffix(MARKER_END));
        match (marker, templates.last_mut()) {
            (Some(name), _) => templates.push((name.to_string(), Vec::new())),
            (None, Some((_, body))) => body.push(line),
            (None, None) => {}
        }
    }
    templates
        .into_iter()
        .map(|(name, body)| (name, body.join("\n")))
        .collect()
}

/// Templates available for spawning
///
/// # Errors
///
/// Returns `dependency_error` without ssh for a remote host, and `ssh_error`
/// or `command_error` if the scan fails
pub fn discover_templates(
    runner: &dyn CommandRunner,
    input: DiscoverTemplatesInput,
) -> Result<DiscoverTemplatesOutput, InfraError> {
    let target = Target::from_host(&input.host);
    target.require(runner, None)?;

    let output = process::run(runner, &target.command(&templates_script(&input.base_dir)))?;
    if !output.success() {
        return Err(target.failure(output.error_message("command failed")));
    }

    let root = input.base_dir.trim_end_matches('/');
    let templates = split_templates(&output.stdout)
        .into_iter()
        .map(|(name, content)| {
            Ok(TemplateInfo {
                path: format!("{root}/{name}/{TEMPLATE_FILE}"),
                env_vars: env_references(&content)?,
                name,
            })
        })
        .collect::<Result<Vec<_>, InfraError>>()?;

    Ok(DiscoverTemplatesOutput {
        host: input.host,
        base_dir: input.base_dir,
        template_count: templates.len(),
        templates,
    })
}
