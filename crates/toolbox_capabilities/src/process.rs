//! Subprocess seam.
//!
//! Every capability that shells out goes through [`CommandRunner`], so tests
//! can substitute a fake and a missing binary always surfaces as
//! `dependency_error`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use toolbox_core::{DomainError, ErrorCode};

/// A command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Binary name or path
    pub program: String,
    /// Arguments, passed without a shell
    pub args: Vec<String>,
    /// Text written to stdin
    pub stdin: Option<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a spec for `program`
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            env: Vec::new(),
        }
    }

    /// `sh -c script`
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` on stdin
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Set an environment variable for the child
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program followed by arguments
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl CommandOutput {
    /// Exit code zero
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Trimmed stderr, or `fallback` when empty
    #[must_use]
    pub fn error_message(&self, fallback: &str) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            fallback.to_string()
        } else {
            trimmed.to_string()
        }
    }
}

/// Locates and runs external binaries
pub trait CommandRunner: Send + Sync {
    /// Resolve `binary` on `PATH`
    fn locate(&self, binary: &str) -> Option<PathBuf>;

    /// Run to completion, capturing output
    ///
    /// # Errors
    ///
    /// Returns error if the process cannot be spawned or waited on
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;
}

/// Real processes via `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }

    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        tracing::debug!(program = %spec.program, args = ?spec.args, "spawning");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (&spec.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Failures shared by every subprocess-backed capability
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Binary not on `PATH`
    #[error("{0} not found in PATH")]
    Missing(String),
    /// Binary found but could not be run
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl DomainError for ProcessError {
    fn code(&self) -> &'static str {
        match self {
            Self::Missing(_) => ErrorCode::DependencyError.as_str(),
            Self::Spawn { .. } => ErrorCode::CapabilityError.as_str(),
        }
    }
}

/// Resolve `binary` or fail with [`ProcessError::Missing`]
///
/// # Errors
///
/// Returns error if the binary is not on `PATH`
pub fn require(runner: &dyn CommandRunner, binary: &str) -> Result<PathBuf, ProcessError> {
    runner
        .locate(binary)
        .ok_or_else(|| ProcessError::Missing(binary.to_string()))
}

/// Run and wrap spawn failures
///
/// # Errors
///
/// Returns [`ProcessError::Spawn`] if the process cannot be run
pub fn run(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
    runner.run(spec).map_err(|source| ProcessError::Spawn {
        program: spec.program.clone(),
        source,
    })
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;
    use toolbox_core::CapabilityError;

    #[test]
    fn test_spec_argv() {
        let spec = CommandSpec::new("ssh").args(["-o", "BatchMode=yes"]).arg("host");
        assert_eq!(spec.argv(), vec!["ssh", "-o", "BatchMode=yes", "host"]);
        assert!(spec.stdin.is_none());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn test_shell_and_env() {
        let spec = CommandSpec::shell("cd /opt && docker compose ps").env("NAME", "alpha");
        assert_eq!(spec.argv(), vec!["sh", "-c", "cd /opt && docker compose ps"]);
        assert_eq!(spec.env, vec![("NAME".to_string(), "alpha".to_string())]);
    }

    #[test]
    fn test_error_message_fallback() {
        let out = CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "  \n".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.error_message("remote command failed"), "remote command failed");
    }

    #[test]
    fn test_require_missing_is_dependency_error() {
        let runner = FakeRunner::empty();
        let err: CapabilityError = require(&runner, "ssh").unwrap_err().into();
        assert_eq!(err.code, "dependency_error");
        assert_eq!(err.message, "ssh not found in PATH");
    }

    #[test]
    fn test_fake_runner_records_calls() {
        let runner = FakeRunner::with_binaries(&["gh"]).respond(0, "ok\n", "");
        assert!(require(&runner, "gh").is_ok());
        let out = run(&runner, &CommandSpec::new("gh").arg("version")).unwrap();
        assert!(out.success());
        assert_eq!(runner.calls().len(), 1);
        assert!(run(&runner, &CommandSpec::new("gh")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_pipes_stdin() {
        let runner = SystemRunner;
        if runner.locate("cat").is_none() {
            return;
        }
        let out = runner
            .run(&CommandSpec::new("cat").stdin("piped text"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "piped text");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_sets_env() {
        let runner = SystemRunner;
        if runner.locate("sh").is_none() {
            return;
        }
        let out = runner
            .run(&CommandSpec::shell("printf %s \"$TOOLBOX_TEST_VAR\"").env("TOOLBOX_TEST_VAR", "set"))
            .unwrap();
        assert_eq!(out.stdout, "set");
    }
}
