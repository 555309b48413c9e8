//! Configuration type definitions for sandboxes
//!
//! A minimal YAML file only needs to pick a runner; everything else has a default.
//! Backend-specific knobs live in the `process` and `docker` sections and are ignored
//! by the other backend.

use crate::environment::AllowList;
use crate::errors::SandboxError;
use crate::executors::{RunnerKind, RunnerSettings};
use crate::script::{Dependencies, ScriptBuilder, DEFAULT_REQUIRES_PYTHON};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DOCKER_IMAGE: &str = "ghcr.io/astral-sh/uv:python3.10-alpine";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub runner: RunnerKind,
    #[serde(default = "default_requires_python")]
    pub requires_python: String,
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Variables offered to the sandbox before allow-list filtering
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Offer this process's whole environment too (entries in `environment` win)
    #[serde(default)]
    pub inherit_host_environment: bool,
    /// Overrides the backend's default allow-list when set
    #[serde(default)]
    pub allowed_env_vars: Option<AllowList>,
    /// Wall-clock budget per execution; `null` disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub process: ProcessOptions,
    #[serde(default)]
    pub docker: DockerOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Explicit uv executable; looked up on PATH when unset
    #[serde(default)]
    pub uv_path: Option<PathBuf>,
    #[serde(default)]
    pub cpu_time_limit_secs: Option<u64>,
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerOptions {
    #[serde(default = "default_docker_image")]
    pub image: String,
    #[serde(default)]
    pub connection: DockerConnection,
    #[serde(default)]
    pub container: ContainerOptions,
}

/// How to reach the Docker daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DockerConnection {
    /// DOCKER_HOST or the platform default socket
    #[default]
    LocalDefaults,
    Socket {
        path: String,
        #[serde(default = "default_docker_timeout_secs")]
        timeout_secs: u64,
    },
    Http {
        address: String,
        #[serde(default = "default_docker_timeout_secs")]
        timeout_secs: u64,
    },
}

/// Capacity limits and identity for sandbox containers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerOptions {
    #[serde(default)]
    pub memory_bytes: Option<i64>,
    #[serde(default)]
    pub nano_cpus: Option<i64>,
    #[serde(default)]
    pub pids_limit: Option<i64>,
    /// Replaces the network mode derived from `allow_network`
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::default(),
            requires_python: default_requires_python(),
            dependencies: Dependencies::new(),
            environment: HashMap::new(),
            inherit_host_environment: false,
            allowed_env_vars: None,
            timeout_secs: default_timeout_secs(),
            allow_network: false,
            process: ProcessOptions::default(),
            docker: DockerOptions::default(),
        }
    }
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            image: default_docker_image(),
            connection: DockerConnection::default(),
            container: ContainerOptions::default(),
        }
    }
}

fn default_requires_python() -> String { DEFAULT_REQUIRES_PYTHON.to_string() }
fn default_timeout_secs() -> Option<f64> { Some(60.0) }
fn default_docker_image() -> String { DEFAULT_DOCKER_IMAGE.to_string() }
pub fn default_docker_timeout_secs() -> u64 { 120 }

impl SandboxConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SandboxError> {
        if let Some(secs) = self.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(SandboxError::ConfigError(format!(
                    "timeout_secs must be a positive number of seconds, got {}",
                    secs
                )));
            }
            // Anything a Duration cannot hold would otherwise read as "no timeout"
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(SandboxError::ConfigError(format!(
                    "timeout_secs is too large, got {}; use null to disable the timeout",
                    secs
                )));
            }
        }

        if self.requires_python.trim().is_empty() {
            return Err(SandboxError::ConfigError("requires_python cannot be empty".to_string()));
        }

        for (name, _) in self.dependencies.iter() {
            if name.trim().is_empty() {
                return Err(SandboxError::ConfigError("Dependency name cannot be empty".to_string()));
            }
        }

        if let Some(allowed) = &self.allowed_env_vars {
            for name in allowed.iter() {
                if name.is_empty() || name.contains('=') {
                    return Err(SandboxError::ConfigError(format!(
                        "Invalid environment variable name in allowed_env_vars: '{}'",
                        name
                    )));
                }
            }
        }

        if self.process.cpu_time_limit_secs == Some(0) {
            return Err(SandboxError::ConfigError("process.cpu_time_limit_secs must be greater than 0".to_string()));
        }
        if self.process.memory_limit_bytes == Some(0) {
            return Err(SandboxError::ConfigError("process.memory_limit_bytes must be greater than 0".to_string()));
        }

        self.docker.validate()
    }

    /// Raw environment offered to the runner, before allow-list filtering
    pub fn offered_environment(&self) -> HashMap<String, String> {
        let mut offered = if self.inherit_host_environment {
            std::env::vars().collect()
        } else {
            HashMap::new()
        };
        offered.extend(self.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        offered
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            environment: self.offered_environment(),
            allowed_env_vars: self.allowed_env_vars.clone(),
            timeout: self.timeout(),
        }
    }

    pub fn script_builder(&self) -> ScriptBuilder {
        ScriptBuilder::new(self.dependencies.clone()).with_requires_python(self.requires_python.clone())
    }
}

impl DockerOptions {
    fn validate(&self) -> Result<(), SandboxError> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::ConfigError("docker.image cannot be empty".to_string()));
        }

        match &self.connection {
            DockerConnection::LocalDefaults => {}
            DockerConnection::Socket { path, timeout_secs } => {
                if path.is_empty() {
                    return Err(SandboxError::ConfigError("docker.connection.path cannot be empty".to_string()));
                }
                if *timeout_secs == 0 {
                    return Err(SandboxError::ConfigError("docker.connection.timeout_secs must be greater than 0".to_string()));
                }
            }
            DockerConnection::Http { address, timeout_secs } => {
                if address.is_empty() {
                    return Err(SandboxError::ConfigError("docker.connection.address cannot be empty".to_string()));
                }
                if *timeout_secs == 0 {
                    return Err(SandboxError::ConfigError("docker.connection.timeout_secs must be greater than 0".to_string()));
                }
            }
        }

        let limits = [
            ("memory_bytes", self.container.memory_bytes),
            ("nano_cpus", self.container.nano_cpus),
            ("pids_limit", self.container.pids_limit),
        ];
        for (name, limit) in limits {
            if let Some(value) = limit {
                if value <= 0 {
                    return Err(SandboxError::ConfigError(format!(
                        "docker.container.{} must be greater than 0, got {}",
                        name, value
                    )));
                }
            }
        }

        Ok(())
    }
}
