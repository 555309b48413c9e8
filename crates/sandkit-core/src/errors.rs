//! Error types for sandbox construction and the guest wire protocol
//!
//! Two families live here. `SandboxError` covers the failures that mean a sandbox
//! could not be trusted to have started at all (missing tools, bad configuration,
//! unreachable daemon); those are returned as `Err` to the caller. `CodecError`
//! covers the JSON protocol spoken with guest code; those are never raised past the
//! `Sandbox` facade and end up in an `Outcome` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Required tool '{tool}' is not available: {reason}")]
    ToolNotFound { tool: String, reason: String },
    #[error("Unknown runner type '{0}'. Use one of: subprocess, docker")]
    UnknownRunner(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Docker image/container error: {0}")]
    ResourceNotFound(String),
    #[error("Docker operation failed: {0}")]
    DaemonError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SandboxError {
    fn from(err: std::io::Error) -> Self {
        SandboxError::IoError(err.to_string())
    }
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => SandboxError::ResourceNotFound(message),
            other => SandboxError::DaemonError(other.to_string()),
        }
    }
}

/// Errors raised while encoding call inputs or decoding the guest's reply
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Decoding error: failed to decode JSON result from stdout: {message}. Output preview: {preview}")]
    Decoding { message: String, preview: String },
    #[error("Decoding error: script JSON output was not an object. Output preview: {preview}")]
    NotAnObject { preview: String },
    #[error("Decoding error: script JSON output missing 'result' or 'error'. Output preview: {preview}")]
    MissingKeys { preview: String },
}

/// Result type for fallible sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;
