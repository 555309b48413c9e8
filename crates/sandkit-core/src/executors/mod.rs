//! Execution backends for sandboxed guest scripts.
//!
//! A runner takes a fully assembled artifact and executes it either as a short-lived
//! host process (`ProcessRunner`) or inside a throwaway Docker container
//! (`DockerRunner`). Runners report execution failures inside the returned
//! `Outcome`; only failures that mean the sandbox could not be set up are returned
//! as `Err`.

use crate::codec::bound_output;
use crate::config::SandboxConfig;
use crate::environment::{AllowList, EnvironmentFilter};
use crate::errors::{SandboxError, SandboxResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod docker;
pub mod process;

pub use docker::DockerRunner;
pub use process::{ProcessRunner, ResourceLimits};

/// Class of failure carried by an `Outcome`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The wall-clock budget expired and the guest was killed
    Timeout,
    /// The guest process exited with a nonzero status
    NonZeroExit,
    /// The runner itself failed after setup (spawn, archive, exec plumbing)
    Runner,
    Encoding,
    Decoding,
    /// Nothing on stdout, only stderr
    NoOutput,
    /// The guest reported an error object
    Guest,
}

/// Captured result of one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub stdout: String,
    pub stderr: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub exit_code: Option<i64>,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Mark the outcome as failed. Captured streams are kept but bounded.
    pub fn fail(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self.error_kind = Some(kind);
        self.stdout = bound_output(&self.stdout);
        self.stderr = bound_output(&self.stderr);
        self
    }

    /// Append a `[Runner Error]` note to stderr
    pub fn note_runner_error(mut self, note: impl fmt::Display) -> Self {
        self.stderr.push_str(&format!("\n[Runner Error] {}", note));
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i64>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    fn kind(&self) -> RunnerKind;

    /// The filtered environment handed to every execution
    fn environment(&self) -> &BTreeMap<String, String>;

    fn timeout(&self) -> Option<Duration>;

    async fn execute(&self, artifact: &str) -> SandboxResult<Outcome>;

    /// Release anything the runner still holds. Safe to call more than once.
    async fn cleanup(&self) -> SandboxResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    #[default]
    #[serde(alias = "process")]
    Subprocess,
    Docker,
}

impl RunnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Subprocess => "subprocess",
            RunnerKind::Docker => "docker",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "subprocess" | "process" => Ok(RunnerKind::Subprocess),
            "docker" => Ok(RunnerKind::Docker),
            other => Err(SandboxError::UnknownRunner(other.to_string())),
        }
    }
}

/// Settings shared by every backend
#[derive(Debug, Clone, Default)]
pub struct RunnerSettings {
    /// Raw environment offered to the sandbox, before filtering
    pub environment: HashMap<String, String>,
    /// Overrides the backend's default allow-list
    pub allowed_env_vars: Option<AllowList>,
    pub timeout: Option<Duration>,
}

impl RunnerSettings {
    pub fn filtered_environment(&self, kind: RunnerKind) -> BTreeMap<String, String> {
        EnvironmentFilter::for_runner(kind, self.allowed_env_vars.clone()).apply(&self.environment)
    }
}

/// Build the runner selected by `config.runner`
pub fn create_runner(config: &SandboxConfig) -> SandboxResult<Box<dyn Runner>> {
    let settings = config.runner_settings();
    let runner: Box<dyn Runner> = match config.runner {
        RunnerKind::Subprocess => Box::new(ProcessRunner::new(settings, &config.process)?),
        RunnerKind::Docker => Box::new(DockerRunner::new(
            settings,
            &config.docker,
            config.allow_network,
        )?),
    };
    log::info!(
        "Created {} runner (timeout: {:?}, {} environment variables)",
        runner.kind(),
        runner.timeout(),
        runner.environment().len()
    );
    Ok(runner)
}

/// Convert the runner's reported exit status into an outcome failure message
pub(crate) fn exit_failure_message(backend: &str, exit_code: i64, stderr: &str) -> String {
    format!(
        "{} failed (exit code {}). Stderr: {}",
        backend,
        exit_code,
        crate::codec::preview(stderr.trim(), crate::codec::PREVIEW_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_kind_parsing() {
        assert_eq!("subprocess".parse::<RunnerKind>().unwrap(), RunnerKind::Subprocess);
        assert_eq!("process".parse::<RunnerKind>().unwrap(), RunnerKind::Subprocess);
        assert_eq!(" Docker ".parse::<RunnerKind>().unwrap(), RunnerKind::Docker);
        let err = "firecracker".parse::<RunnerKind>().unwrap_err();
        assert!(matches!(err, SandboxError::UnknownRunner(ref name) if name == "firecracker"));
    }

    #[test]
    fn test_failed_outcome_keeps_bounded_streams() {
        let big = "e".repeat(crate::codec::MAX_RETAINED_OUTPUT_BYTES * 2);
        let outcome = Outcome::new("partial", big.clone()).fail(ErrorKind::Runner, "broken");
        assert_eq!(outcome.stdout, "partial");
        assert!(outcome.stderr.len() < big.len());
        assert_eq!(outcome.error.as_deref(), Some("broken"));
        assert!(!outcome.is_success());
        assert!(!outcome.is_timeout());
    }

    #[test]
    fn test_exit_failure_message_mentions_code_and_stderr() {
        let message = exit_failure_message("Subprocess", 3, "boom\n");
        assert_eq!(message, "Subprocess failed (exit code 3). Stderr: boom");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NonZeroExit).unwrap();
        assert_eq!(json, "\"non_zero_exit\"");
    }
}
