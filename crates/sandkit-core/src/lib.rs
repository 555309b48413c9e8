//! Sandboxed execution of untrusted guest scripts.
//!
//! Guest code is wrapped into a self-describing script artifact (inline dependency
//! metadata plus, for function calls, a small JSON protocol) and executed by `uv`
//! either as an isolated host process or inside a locked-down Docker container.
//!
//! # Architecture Overview
//!
//! - **Script builder**: renders the inline metadata header and function-call trailer
//! - **Codec**: JSON encoding of call inputs and decoding of the guest reply
//! - **Environment filter**: allow-list of variables that may cross into the sandbox
//! - **Runners**: process and container backends behind the `Runner` trait
//! - **Outcome assembly**: folds backend output and guest reply into one `Outcome`
//! - **Configuration system**: YAML loading and a fluent builder

pub mod codec;
pub mod config;
pub mod environment;
pub mod errors;
pub mod executors;
pub mod outcome;
pub mod sandbox;
pub mod script;

pub use config::*;
pub use environment::{AllowList, EnvironmentFilter};
pub use errors::{CodecError, SandboxError, SandboxResult};
pub use executors::{create_runner, DockerRunner, ErrorKind, Outcome, ProcessRunner, Runner, RunnerKind};
pub use outcome::assemble_function_outcome;
pub use sandbox::{ExecutionRequest, Sandbox};
pub use script::{Dependencies, DependencySpec, FunctionCall, ScriptBuilder};
