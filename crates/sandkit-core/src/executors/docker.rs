// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    StopContainerOptions as BollardStopContainerOptionsQuery,
    UploadToContainerOptions as BollardUploadToContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::default::Default;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{exit_failure_message, ErrorKind, Outcome, Runner, RunnerKind, RunnerSettings};
use crate::config::{ContainerOptions, DockerConnection, DockerOptions};
use crate::errors::{SandboxError, SandboxResult};

/// Where the artifact lands inside the container
pub const CONTAINER_SCRIPT_PATH: &str = "/sandbox_script.py";
const SCRIPT_ARCHIVE_NAME: &str = "sandbox_script.py";

/// Grace period given to the keep-alive process before the daemon kills it
const STOP_GRACE_SECS: i32 = 5;

/// Runs artifacts with `uv run` inside a throwaway container, one per execution
pub struct DockerRunner {
    docker: Docker,
    image: String,
    container: ContainerOptions,
    network_mode: Option<String>,
    environment: BTreeMap<String, String>,
    timeout: Option<Duration>,
    live: Mutex<HashSet<String>>,
}

impl DockerRunner {
    pub fn new(
        settings: RunnerSettings,
        options: &DockerOptions,
        allow_network: bool,
    ) -> SandboxResult<Self> {
        let docker = connect(&options.connection)?;
        Ok(Self {
            docker,
            image: options.image.clone(),
            container: options.container.clone(),
            network_mode: resolve_network_mode(allow_network, options.container.network_mode.as_deref()),
            environment: settings.filtered_environment(RunnerKind::Docker),
            timeout: settings.timeout,
            live: Mutex::new(HashSet::new()),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// Containers created by this runner and not yet torn down
    pub fn live_containers(&self) -> Vec<String> {
        self.live().iter().cloned().collect()
    }

    fn live(&self) -> MutexGuard<'_, HashSet<String>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_in_container(
        &self,
        id: &str,
        archive: Vec<u8>,
        started: Instant,
    ) -> SandboxResult<Outcome> {
        self.docker
            .start_container(id, None::<BollardStartContainerOptionsQuery>)
            .await?;

        self.docker
            .upload_to_container(
                id,
                Some(BollardUploadToContainerOptionsQuery {
                    path: "/".to_string(),
                    ..Default::default()
                }),
                bollard::body_full(archive.into()),
            )
            .await?;

        let exec = self
            .docker
            .create_exec(
                id,
                ExecConfig {
                    cmd: Some(vec![
                        "uv".to_string(),
                        "run".to_string(),
                        CONTAINER_SCRIPT_PATH.to_string(),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self.docker.start_exec(&exec.id, None::<StartExecOptions>).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(log_result) = output.next().await {
                    match log_result {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message))
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        Ok(_) => {}
                        Err(e) => return interrupted(stdout, stderr, e, started),
                    }
                }
            }
            StartExecResults::Detached => {
                return Ok(Outcome::default()
                    .note_runner_error("exec started detached")
                    .fail(ErrorKind::Runner, "Container exec started detached, no output captured")
                    .with_duration(started.elapsed()));
            }
        }

        let inspected = match self.docker.inspect_exec(&exec.id).await {
            Ok(inspected) => inspected,
            Err(e) => return interrupted(stdout, stderr, e, started),
        };
        let elapsed = started.elapsed();
        let outcome = Outcome::new(stdout, stderr)
            .with_exit_code(inspected.exit_code)
            .with_duration(elapsed);

        match inspected.exit_code {
            Some(0) => Ok(outcome),
            Some(code) => {
                let message = exit_failure_message("Container exec", code, &outcome.stderr);
                Ok(outcome.fail(ErrorKind::NonZeroExit, message))
            }
            None => Ok(outcome
                .note_runner_error("exec exit code unavailable")
                .fail(ErrorKind::Runner, "Container exec finished without an exit code")),
        }
    }

    /// Stop then force-remove, ignoring failures (auto_remove often wins the race)
    async fn teardown(&self, id: &str) {
        if let Err(e) = self
            .docker
            .stop_container(
                id,
                Some(BollardStopContainerOptionsQuery {
                    t: Some(STOP_GRACE_SECS),
                    ..Default::default()
                }),
            )
            .await
        {
            log::debug!("Stopping container {} failed: {}", id, e);
        }

        if let Err(e) = self
            .docker
            .remove_container(
                id,
                Some(BollardRemoveContainerOptionsQuery {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            log::debug!("Removing container {} failed: {}", id, e);
        }

        self.live().remove(id);
    }
}

#[async_trait]
impl Runner for DockerRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Docker
    }

    fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, artifact: &str) -> SandboxResult<Outcome> {
        let started = Instant::now();
        self.docker.ping().await?;

        let archive = match script_archive(artifact) {
            Ok(archive) => archive,
            Err(e) => {
                return Ok(Outcome::default()
                    .note_runner_error(&e)
                    .fail(ErrorKind::Runner, format!("Failed to build script archive: {}", e))
                    .with_duration(started.elapsed()));
            }
        };

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("sandkit-{}", Uuid::new_v4())),
            ..Default::default()
        });
        let body = container_body(&self.image, &self.environment, &self.container, self.network_mode.clone());
        let container = self.docker.create_container(options, body).await?;
        self.live().insert(container.id.clone());
        log::debug!(
            "Created container {} from {} (timeout {:?} is not enforced in-process)",
            container.id,
            self.image,
            self.timeout
        );

        let result = match self.run_in_container(&container.id, archive, started).await {
            // The container exists, so anything short of a missing resource is an
            // execution failure rather than a setup failure
            Err(SandboxError::DaemonError(message)) => Ok(Outcome::default()
                .note_runner_error(&message)
                .fail(ErrorKind::Runner, format!("Docker operation failed: {}", message))
                .with_duration(started.elapsed())),
            other => other,
        };
        self.teardown(&container.id).await;
        result
    }

    async fn cleanup(&self) -> SandboxResult<()> {
        let orphans: Vec<String> = self.live().drain().collect();
        for id in orphans {
            log::debug!("Tearing down orphaned container {}", id);
            self.teardown(&id).await;
        }
        Ok(())
    }
}

/// Fold a daemon error raised after the guest started into a runner outcome that
/// keeps whatever output was already streamed back
fn interrupted(
    stdout: String,
    stderr: String,
    err: bollard::errors::Error,
    started: Instant,
) -> SandboxResult<Outcome> {
    match SandboxError::from(err) {
        SandboxError::DaemonError(message) => {
            log::warn!("Container exec interrupted: {}", message);
            Ok(Outcome::new(stdout, stderr)
                .note_runner_error(&message)
                .fail(ErrorKind::Runner, format!("Docker operation failed: {}", message))
                .with_duration(started.elapsed()))
        }
        other => Err(other),
    }
}

fn connect(connection: &DockerConnection) -> SandboxResult<Docker> {
    let docker = match connection {
        DockerConnection::LocalDefaults => Docker::connect_with_local_defaults()?,
        DockerConnection::Socket { path, timeout_secs } => {
            Docker::connect_with_socket(path, *timeout_secs, bollard::API_DEFAULT_VERSION)?
        }
        DockerConnection::Http { address, timeout_secs } => {
            Docker::connect_with_http(address, *timeout_secs, bollard::API_DEFAULT_VERSION)?
        }
    };
    Ok(docker)
}

/// `none` unless networking is allowed; an explicit mode always wins
fn resolve_network_mode(allow_network: bool, explicit: Option<&str>) -> Option<String> {
    let derived = if allow_network { None } else { Some("none") };
    match explicit {
        Some(mode) => {
            if Some(mode) != derived {
                log::warn!(
                    "Using network_mode '{}' from container options instead of {}",
                    mode,
                    derived.unwrap_or("the daemon default")
                );
            }
            Some(mode.to_string())
        }
        None => derived.map(str::to_string),
    }
}

fn container_body(
    image: &str,
    environment: &BTreeMap<String, String>,
    options: &ContainerOptions,
    network_mode: Option<String>,
) -> ContainerCreateBody {
    let env: Vec<String> = environment
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();

    ContainerCreateBody {
        image: Some(image.to_string()),
        // Keeps the container alive for the exec
        cmd: Some(vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]),
        env: Some(env),
        user: options.user.clone(),
        host_config: Some(HostConfig {
            auto_remove: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            network_mode,
            memory: options.memory_bytes,
            nano_cpus: options.nano_cpus,
            pids_limit: options.pids_limit,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Single-entry tar archive holding the artifact, extracted at `/`
fn script_archive(artifact: &str) -> io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(artifact.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, SCRIPT_ARCHIVE_NAME, artifact.as_bytes())?;
    builder.into_inner()
}
