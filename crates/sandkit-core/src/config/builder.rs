//! Fluent builder for sandbox configurations and sandboxes

use crate::config::types::*;
use crate::environment::AllowList;
use crate::errors::SandboxError;
use crate::executors::RunnerKind;
use crate::sandbox::Sandbox;
use crate::script::DependencySpec;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for creating sandbox configurations
#[derive(Debug, Clone, Default)]
pub struct SandboxBuilder {
    config: SandboxConfig,
}

impl SandboxBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn runner(mut self, runner: RunnerKind) -> Self {
        self.config.runner = runner;
        self
    }

    pub fn requires_python(mut self, requires_python: impl Into<String>) -> Self {
        self.config.requires_python = requires_python.into();
        self
    }

    /// Declare a guest dependency
    pub fn dependency(mut self, name: impl Into<String>, spec: impl Into<DependencySpec>) -> Self {
        self.config.dependencies.insert(name, spec);
        self
    }

    /// Offer an environment variable to the sandbox (still subject to the allow-list)
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.environment.insert(name.into(), value.into());
        self
    }

    pub fn inherit_host_environment(mut self, inherit: bool) -> Self {
        self.config.inherit_host_environment = inherit;
        self
    }

    /// Replace the backend default allow-list
    pub fn allowed_env_vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_env_vars = Some(names.into_iter().collect::<AllowList>());
        self
    }

    /// Add one name to the allow-list, starting from the backend default
    pub fn allow_env_var(mut self, name: impl Into<String>) -> Self {
        let runner = self.config.runner;
        self.config
            .allowed_env_vars
            .get_or_insert_with(|| AllowList::default_for(runner))
            .insert(name);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.config.timeout_secs = None;
        self
    }

    pub fn allow_network(mut self, allow: bool) -> Self {
        self.config.allow_network = allow;
        self
    }

    pub fn uv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.process.uv_path = Some(path.into());
        self
    }

    pub fn cpu_time_limit_secs(mut self, secs: u64) -> Self {
        self.config.process.cpu_time_limit_secs = Some(secs);
        self
    }

    pub fn memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.config.process.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn docker_image(mut self, image: impl Into<String>) -> Self {
        self.config.docker.image = image.into();
        self
    }

    pub fn docker_connection(mut self, connection: DockerConnection) -> Self {
        self.config.docker.connection = connection;
        self
    }

    pub fn container_options(mut self, container: ContainerOptions) -> Self {
        self.config.docker.container = container;
        self
    }

    /// Build the configuration, validating it first
    pub fn build_config(self) -> Result<SandboxConfig, SandboxError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation
    pub fn build_unchecked(self) -> SandboxConfig {
        self.config
    }

    /// Validate the configuration and construct the sandbox
    pub fn build(self) -> Result<Sandbox, SandboxError> {
        Sandbox::new(self.config)
    }
}
