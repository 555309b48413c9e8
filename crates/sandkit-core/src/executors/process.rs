// src/executors/process.rs
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{exit_failure_message, ErrorKind, Outcome, Runner, RunnerKind, RunnerSettings};
use crate::config::ProcessOptions;
use crate::errors::{SandboxError, SandboxResult};

/// How long to wait for the pipes to drain after the process group was killed
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Kernel-enforced limits applied to the child between fork and exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// RLIMIT_CPU, in seconds
    pub cpu_time_secs: Option<u64>,
    /// RLIMIT_AS, in bytes
    pub memory_bytes: Option<u64>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.cpu_time_secs.is_none() && self.memory_bytes.is_none()
    }

    /// Apply the limits to the calling process. Only call this in a forked child.
    #[cfg(unix)]
    fn apply(&self) -> io::Result<()> {
        if let Some(secs) = self.cpu_time_secs {
            let rlim = libc::rlimit {
                rlim_cur: secs as libc::rlim_t,
                rlim_max: secs as libc::rlim_t,
            };
            if unsafe { libc::setrlimit(libc::RLIMIT_CPU, &rlim) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        if let Some(bytes) = self.memory_bytes {
            let rlim = libc::rlimit {
                rlim_cur: bytes as libc::rlim_t,
                rlim_max: bytes as libc::rlim_t,
            };
            if unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// Runs artifacts as `uv run --no-project <file>` in a fresh process group
pub struct ProcessRunner {
    uv: PathBuf,
    environment: BTreeMap<String, String>,
    timeout: Option<Duration>,
    limits: ResourceLimits,
}

impl ProcessRunner {
    pub fn new(settings: RunnerSettings, options: &ProcessOptions) -> SandboxResult<Self> {
        let uv = resolve_uv(options.uv_path.as_deref())?;
        log::debug!("Using uv at {}", uv.display());
        Ok(Self {
            uv,
            environment: settings.filtered_environment(RunnerKind::Subprocess),
            timeout: settings.timeout,
            limits: ResourceLimits {
                cpu_time_secs: options.cpu_time_limit_secs,
                memory_bytes: options.memory_limit_bytes,
            },
        })
    }

    pub fn uv_path(&self) -> &Path {
        &self.uv
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    fn command(&self, script: &Path) -> Command {
        let mut command = Command::new(&self.uv);
        command
            .arg("run")
            .arg("--no-project")
            .arg(script)
            .env_clear()
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            command.process_group(0);
            if !self.limits.is_empty() {
                let limits = self.limits;
                // SAFETY: the closure only calls setrlimit, which is async-signal-safe
                unsafe {
                    command.pre_exec(move || limits.apply());
                }
            }
        }

        command
    }

    async fn run_script(&self, script: &Path, started: Instant) -> SandboxResult<Outcome> {
        let mut child = match self.command(script).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SandboxError::ToolNotFound {
                    tool: self.uv.display().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Ok(Outcome::default()
                    .note_runner_error(&e)
                    .fail(ErrorKind::Runner, format!("Failed to start subprocess: {}", e))
                    .with_duration(started.elapsed()));
            }
        };

        // `id()` is gone once the child has been reaped
        let group = child.id();
        let stdout_reader = OutputCapture::spawn(child.stdout.take());
        let stderr_reader = OutputCapture::spawn(child.stderr.take());

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let status = match waited {
            Some(status) => status,
            None => {
                kill_group(group);
                if let Err(e) = child.kill().await {
                    log::debug!("Failed to reap timed out subprocess: {}", e);
                }
                let stdout = stdout_reader.finish(DRAIN_GRACE).await;
                let stderr = stderr_reader.finish(DRAIN_GRACE).await;
                let secs = self.timeout.unwrap_or_default().as_secs_f64();
                log::warn!("Subprocess timed out after {} seconds, killed its process group", secs);
                return Ok(Outcome::new(stdout, stderr)
                    .note_runner_error("TimeoutExpired")
                    .fail(
                        ErrorKind::Timeout,
                        format!("Timeout error: subprocess timed out after {} seconds", secs),
                    )
                    .with_duration(started.elapsed()));
            }
        };

        // Anything the guest left running in the background dies with the execution
        kill_group(group);
        let stdout = stdout_reader.finish(DRAIN_GRACE).await;
        let stderr = stderr_reader.finish(DRAIN_GRACE).await;
        let elapsed = started.elapsed();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                return Ok(Outcome::new(stdout, stderr)
                    .note_runner_error(&e)
                    .fail(ErrorKind::Runner, format!("Failed to wait for subprocess: {}", e))
                    .with_duration(elapsed));
            }
        };

        let exit_code = exit_code(status);
        log::debug!("Subprocess exited with {} after {:?}", exit_code, elapsed);
        let outcome = Outcome::new(stdout, stderr)
            .with_exit_code(Some(exit_code))
            .with_duration(elapsed);
        if exit_code == 0 {
            Ok(outcome)
        } else {
            let message = exit_failure_message("Subprocess", exit_code, &outcome.stderr);
            Ok(outcome.fail(ErrorKind::NonZeroExit, message))
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Subprocess
    }

    fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, artifact: &str) -> SandboxResult<Outcome> {
        let started = Instant::now();

        // Removed when dropped, on every return path
        let script = match write_script(artifact).await {
            Ok(script) => script,
            Err(e) => {
                return Ok(Outcome::default()
                    .note_runner_error(&e)
                    .fail(ErrorKind::Runner, format!("Failed to write script file: {}", e))
                    .with_duration(started.elapsed()));
            }
        };
        log::debug!("Running script {}", script.path().display());

        self.run_script(script.path(), started).await
    }
}

fn resolve_uv(configured: Option<&Path>) -> SandboxResult<PathBuf> {
    let candidate = configured.unwrap_or_else(|| Path::new("uv"));
    which::which(candidate).map_err(|e| SandboxError::ToolNotFound {
        tool: candidate.display().to_string(),
        reason: e.to_string(),
    })
}

async fn write_script(artifact: &str) -> io::Result<tempfile::NamedTempFile> {
    let script = tempfile::Builder::new()
        .prefix("sandkit-")
        .suffix(".py")
        .tempfile()?;
    tokio::fs::write(script.path(), artifact).await?;
    Ok(script)
}

/// Accumulates a pipe into a shared buffer so a stalled reader still yields
/// whatever arrived before it was abandoned
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl OutputCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buffer, task }
    }

    /// Wait up to `grace` for end of stream, then return what was captured
    async fn finish(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            log::debug!("Output pipe still open after {:?}, keeping partial output", grace);
            self.task.abort();
        }
        let bytes = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let text = String::from_utf8_lossy(&bytes).into_owned();
        text
    }
}

/// SIGKILL the process group led by the child, reaching anything it spawned
fn kill_group(group: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = group {
            // ESRCH just means the group is already empty
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = group;
}

fn exit_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return code as i64;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -(signal as i64);
        }
    }
    -1
}
