//! `ghcr.push`: build with `docker buildx` and push to GitHub Container Registry.

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use serde::{Deserialize, Serialize};
use toolbox_core::DomainError;

/// Capability name
pub const NAME: &str = "ghcr.push";

const REGISTRY: &str = "ghcr.io";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct PushInput {
    /// `owner/image`
    pub repo: String,
    /// Build context directory
    pub context: String,
    /// Dockerfile path
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    /// Target platform
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Tags to push
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Return the command instead of running it
    #[serde(default)]
    pub dry_run: bool,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_platform() -> String {
    "linux/arm64".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["latest".to_string()]
}

/// What was done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushAction {
    /// Nothing run
    DryRun,
    /// Built and pushed
    Pushed,
}

/// Output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushOutput {
    /// `ghcr.io/<repo>`
    pub image: String,
    /// Tags pushed
    pub tags: Vec<String>,
    /// Target platform
    pub platform: String,
    /// Action taken
    pub action: PushAction,
    /// Full docker argv, for dry runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_command: Option<Vec<String>>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// docker missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Build or push exited non-zero
    #[error("{0}")]
    BuildPush(String),
}

impl DomainError for PushError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::BuildPush(_) => "build_push_error",
        }
    }
}

/// `docker buildx build` invocation for `input`
#[must_use]
pub fn build_command(input: &PushInput) -> CommandSpec {
    let image = format!("{REGISTRY}/{}", input.repo);
    let mut spec = CommandSpec::new("docker").args([
        "buildx",
        "build",
        "--platform",
        input.platform.as_str(),
        "-f",
        input.dockerfile.as_str(),
    ]);
    for tag in &input.tags {
        spec = spec.arg("-t").arg(format!("{image}:{tag}"));
    }
    spec.arg("--push").arg(input.context.as_str())
}

/// Build and push
///
/// # Errors
///
/// Returns `dependency_error` without docker and `build_push_error` on a
/// non-zero exit
pub fn ghcr_push(runner: &dyn CommandRunner, input: PushInput) -> Result<PushOutput, PushError> {
    process::require(runner, "docker")?;

    let spec = build_command(&input);
    let image = format!("{REGISTRY}/{}", input.repo);

    if input.dry_run {
        return Ok(PushOutput {
            image,
            tags: input.tags,
            platform: input.platform,
            action: PushAction::DryRun,
            docker_command: Some(spec.argv()),
        });
    }

    tracing::info!(image = %image, platform = %input.platform, "building and pushing image");
    let output = process::run(runner, &spec)?;
    if !output.success() {
        return Err(PushError::BuildPush(
            output.error_message("docker buildx build failed"),
        ));
    }

    Ok(PushOutput {
        image,
        tags: input.tags,
        platform: input.platform,
        action: PushAction::Pushed,
        docker_command: None,
    })
}
