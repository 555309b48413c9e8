//! Configuration module for sandboxes
//!
//! Supports YAML configuration files and programmatic configuration building.

pub mod builder;
pub mod loader;
pub mod types;

pub use builder::SandboxBuilder;
pub use loader::*;
pub use types::*;

use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}

/// Create a new configuration builder
pub fn config() -> SandboxBuilder {
    SandboxBuilder::new()
}
