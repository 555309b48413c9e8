//! Configuration loader for YAML files
//!
//! Every load path ends in `SandboxConfig::validate`, so a loaded configuration is
//! always usable by `Sandbox::new`.

use crate::config::types::*;
use crate::errors::SandboxError;
use std::path::Path;
use tokio::fs;

/// Configuration loader
pub struct ConfigLoader;
impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        log::debug!("Loaded sandbox configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        // An empty document means "all defaults"
        let config: SandboxConfig = if content.trim().is_empty() {
            SandboxConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| SandboxError::ConfigError(format!("Failed to parse YAML config: {}", e)))?
        };

        config.validate()?;

        Ok(config)
    }
}
