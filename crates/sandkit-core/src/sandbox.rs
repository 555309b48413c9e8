//! The sandbox facade: builds artifacts, hands them to a runner, shapes the outcome.

use crate::codec::encode_inputs;
use crate::config::SandboxConfig;
use crate::errors::{SandboxError, SandboxResult};
use crate::executors::{create_runner, ErrorKind, Outcome, Runner};
use crate::outcome::assemble_function_outcome;
use crate::script::{validate_identifier, FunctionCall, ScriptBuilder};
use std::time::Instant;

/// One unit of work: plain guest code, or guest code plus a function to call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub code: String,
    pub call: Option<FunctionCall>,
}

impl ExecutionRequest {
    pub fn script(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            call: None,
        }
    }

    pub fn function(code: impl Into<String>, call: FunctionCall) -> Self {
        Self {
            code: code.into(),
            call: Some(call),
        }
    }
}

pub struct Sandbox {
    builder: ScriptBuilder,
    runner: Box<dyn Runner>,
}

impl Sandbox {
    /// Validate `config` and build the runner it selects
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        let runner = create_runner(&config)?;
        Ok(Self {
            builder: config.script_builder(),
            runner,
        })
    }

    /// Use a caller-supplied runner
    pub fn with_runner(builder: ScriptBuilder, runner: Box<dyn Runner>) -> Self {
        Self { builder, runner }
    }

    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    pub fn script_builder(&self) -> &ScriptBuilder {
        &self.builder
    }

    /// Run guest code as-is. The outcome carries raw output, nothing is decoded.
    pub async fn run(&self, code: &str) -> SandboxResult<Outcome> {
        let artifact = self.builder.build_script(code);
        log::debug!("Running plain script on {} runner", self.runner.kind());
        self.runner.execute(&artifact).await
    }

    /// Call a function defined by the guest code and decode its reply
    pub async fn run_function(&self, code: &str, call: &FunctionCall) -> SandboxResult<Outcome> {
        let started = Instant::now();
        let encoded = match encode_inputs(call.inputs.as_ref()) {
            Ok(encoded) => encoded,
            Err(e) => {
                return Ok(Outcome::default()
                    .fail(ErrorKind::Encoding, e.to_string())
                    .with_duration(started.elapsed()));
            }
        };

        // Reject names the trailer could not call before spending an execution
        validate_identifier(&call.name)?;
        let artifact = self.builder.render_function_call(code, call, &encoded);

        log::debug!(
            "Calling '{}'{} on {} runner",
            call.name,
            if call.is_async { " (async)" } else { "" },
            self.runner.kind()
        );
        let raw = self.runner.execute(&artifact).await?;
        Ok(assemble_function_outcome(raw))
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> SandboxResult<Outcome> {
        match &request.call {
            Some(call) => self.run_function(&request.code, call).await,
            None => self.run(&request.code).await,
        }
    }

    /// Release anything the runner still holds
    pub async fn cleanup(&self) -> Result<(), SandboxError> {
        self.runner.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::RunnerKind;
    use crate::script::Dependencies;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records artifacts and replays a canned outcome
    struct RecordingRunner {
        artifacts: Arc<Mutex<Vec<String>>>,
        reply: Outcome,
        environment: BTreeMap<String, String>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        fn kind(&self) -> RunnerKind {
            RunnerKind::Subprocess
        }

        fn environment(&self) -> &BTreeMap<String, String> {
            &self.environment
        }

        fn timeout(&self) -> Option<Duration> {
            None
        }

        async fn execute(&self, artifact: &str) -> SandboxResult<Outcome> {
            self.artifacts.lock().unwrap().push(artifact.to_string());
            Ok(self.reply.clone())
        }
    }

    fn sandbox(reply: Outcome) -> (Sandbox, Arc<Mutex<Vec<String>>>) {
        let artifacts = Arc::new(Mutex::new(Vec::new()));
        let runner = RecordingRunner {
            artifacts: artifacts.clone(),
            reply,
            environment: BTreeMap::new(),
        };
        let builder = ScriptBuilder::new(Dependencies::new().with("numpy", ">=1.20"));
        (Sandbox::with_runner(builder, Box::new(runner)), artifacts)
    }

    #[tokio::test]
    async fn test_run_passes_plain_artifact() {
        let (sandbox, artifacts) = sandbox(Outcome::new("hello\n", ""));
        let outcome = sandbox.run("print('hello')").await.unwrap();

        assert_eq!(outcome.stdout, "hello\n");
        assert_eq!(outcome.result, None);
        let artifacts = artifacts.lock().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].starts_with("# /// script\n"));
        assert!(artifacts[0].contains("\"numpy>=1.20\""));
        assert!(artifacts[0].ends_with("print('hello')\n"));
        assert!(!artifacts[0].contains("__sandkit_emit"));
    }

    #[tokio::test]
    async fn test_run_function_decodes_result() {
        let (sandbox, artifacts) = sandbox(Outcome::new("{\"result\": 5}\n", ""));
        let call = FunctionCall::new("add").with_input_value(json!({"a": 2, "b": 3}));
        let outcome = sandbox.run_function("def add(a, b):\n    return a + b\n", &call).await.unwrap();

        assert_eq!(outcome.result, Some(json!(5)));
        assert!(outcome.is_success());
        let artifacts = artifacts.lock().unwrap();
        assert!(artifacts[0].contains("add(**__sandkit_inputs)"));
    }

    #[tokio::test]
    async fn test_run_function_guest_error() {
        let (sandbox, _) = sandbox(Outcome::new(r#"{"error": "ValueError: Bad input"}"#, ""));
        let outcome = sandbox.run_function("def main():\n    raise ValueError('Bad input')\n", &FunctionCall::default()).await.unwrap();

        assert_eq!(outcome.result, None);
        assert!(outcome.error.unwrap().contains("Bad input"));
    }

    #[tokio::test]
    async fn test_encoding_failure_never_reaches_runner() {
        let (sandbox, artifacts) = sandbox(Outcome::new("{\"result\": 1}", ""));
        let call = FunctionCall::new("main").with_input_value(json!([1, 2]));
        let outcome = sandbox.run_function("def main(): pass", &call).await.unwrap();

        assert_eq!(outcome.error_kind, Some(ErrorKind::Encoding));
        assert!(outcome.error.unwrap().contains("Encoding error"));
        assert!(artifacts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_function_name_is_rejected() {
        let (sandbox, artifacts) = sandbox(Outcome::default());
        let call = FunctionCall::new("main(); import os");
        let err = sandbox.run_function("def main(): pass", &call).await.unwrap_err();

        assert!(matches!(err, SandboxError::InvalidRequest(_)));
        assert!(artifacts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_dispatches_on_request_kind() {
        let (sandbox, artifacts) = sandbox(Outcome::new("{\"result\": true}", ""));

        let plain = sandbox.execute(&ExecutionRequest::script("print(1)")).await.unwrap();
        assert_eq!(plain.result, None);

        let call = sandbox
            .execute(&ExecutionRequest::function("def main(): return True", FunctionCall::default()))
            .await
            .unwrap();
        assert_eq!(call.result, Some(json!(true)));
        assert_eq!(artifacts.lock().unwrap().len(), 2);
        sandbox.cleanup().await.unwrap();
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = SandboxConfig::default();
        config.timeout_secs = Some(-1.0);
        assert!(matches!(Sandbox::new(config), Err(SandboxError::ConfigError(_))));
    }
}
