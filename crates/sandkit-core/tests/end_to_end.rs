use sandkit_core::config::SandboxBuilder;
use sandkit_core::{ErrorKind, FunctionCall, RunnerKind, Sandbox, SandboxError};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Write an executable shell script named `uv` into `dir`
fn fake_uv(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("uv");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A uv that runs the artifact with /bin/sh, so plain artifacts can be shell code
fn shell_uv(dir: &TempDir) -> PathBuf {
    fake_uv(dir, "exec /bin/sh \"$3\"")
}

fn sandbox_with(uv: PathBuf) -> Sandbox {
    SandboxBuilder::new()
        .runner(RunnerKind::Subprocess)
        .uv_path(uv)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_plain_run_sees_header_as_comments() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new()
        .uv_path(shell_uv(&dir))
        .dependency("numpy", ">=1.20")
        .build()
        .unwrap();

    let outcome = sandbox.run("echo hello from guest").await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "hello from guest");
    assert_eq!(outcome.result, None);
}

#[tokio::test]
async fn test_uv_receives_no_project_flag() {
    let dir = TempDir::new().unwrap();
    let sandbox = sandbox_with(fake_uv(&dir, "echo \"$1 $2\""));

    let outcome = sandbox.run("unused").await.unwrap();
    assert_eq!(outcome.stdout.trim(), "run --no-project");
}

#[tokio::test]
async fn test_function_result_is_decoded() {
    let dir = TempDir::new().unwrap();
    let sandbox = sandbox_with(fake_uv(&dir, "echo 'setup noise'\necho '{\"result\": 7}'"));

    let outcome = sandbox
        .run_function("def main():\n    return 7\n", &FunctionCall::default())
        .await
        .unwrap();
    assert_eq!(outcome.result, Some(json!(7)));
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_function_garbage_output_is_decoding_error() {
    let dir = TempDir::new().unwrap();
    let sandbox = sandbox_with(fake_uv(&dir, "echo 'not json'"));

    let outcome = sandbox
        .run_function("def main(): pass\n", &FunctionCall::default())
        .await
        .unwrap();
    assert_eq!(outcome.error_kind, Some(ErrorKind::Decoding));
    assert!(outcome.error.unwrap().contains("Decoding error"));
}

#[tokio::test]
async fn test_function_nonzero_exit_is_reported() {
    let dir = TempDir::new().unwrap();
    let sandbox = sandbox_with(fake_uv(&dir, "echo boom >&2\nexit 3"));

    let outcome = sandbox
        .run_function("def main(): pass\n", &FunctionCall::default())
        .await
        .unwrap();
    assert_eq!(outcome.error_kind, Some(ErrorKind::NonZeroExit));
    let error = outcome.error.unwrap();
    assert!(error.contains("exit code"), "{}", error);
    assert!(error.contains("boom"), "{}", error);
}

#[tokio::test]
async fn test_function_timeout() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new()
        .uv_path(fake_uv(&dir, "sleep 10"))
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();

    let started = Instant::now();
    let outcome = sandbox
        .run_function("def main(): pass\n", &FunctionCall::default())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(outcome.is_timeout());
    assert!(outcome.error.unwrap().contains("Timeout error"));
}

#[tokio::test]
async fn test_environment_is_filtered_end_to_end() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new()
        .uv_path(shell_uv(&dir))
        .env("MY_VAR", "abc")
        .env("SECRET", "123")
        .allow_env_var("MY_VAR")
        .build()
        .unwrap();

    let outcome = sandbox
        .run("echo \"${MY_VAR}:${SECRET:-hidden}\"")
        .await
        .unwrap();
    assert_eq!(outcome.stdout.trim(), "abc:hidden");
}

#[tokio::test]
async fn test_background_process_does_not_swallow_output() {
    let dir = TempDir::new().unwrap();
    let sandbox = sandbox_with(shell_uv(&dir));

    let started = Instant::now();
    let outcome = sandbox.run("sleep 30 &\necho hello").await.unwrap();
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "hello");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_missing_uv_fails_construction() {
    let result = SandboxBuilder::new()
        .uv_path("/nonexistent/bin/uv")
        .build();
    assert!(matches!(result, Err(SandboxError::ToolNotFound { .. })));
}

fn real_sandbox() -> Sandbox {
    SandboxBuilder::new()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("uv must be on PATH")
}

#[tokio::test]
#[ignore = "requires uv and a Python download"]
async fn test_real_function_call() {
    let sandbox = real_sandbox();
    let call = FunctionCall::new("add").with_input_value(json!({"a": 2, "b": 40}));
    let outcome = sandbox
        .run_function("def add(a, b):\n    print('side output')\n    return {'sum': a + b}\n", &call)
        .await
        .unwrap();
    assert_eq!(outcome.result, Some(json!({"sum": 42})), "{:?}", outcome);
    assert!(outcome.stdout.contains("side output"));
}

#[tokio::test]
#[ignore = "requires uv and a Python download"]
async fn test_real_function_raises() {
    let sandbox = real_sandbox();
    let outcome = sandbox
        .run_function(
            "def main():\n    raise ValueError('Bad input')\n",
            &FunctionCall::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.result, None);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Guest));
    assert!(outcome.error.unwrap().contains("Bad input"));
}

#[tokio::test]
#[ignore = "requires uv and a Python download"]
async fn test_real_error_at_module_load_is_guest_error() {
    let sandbox = real_sandbox();
    let outcome = sandbox
        .run_function(
            "raise RuntimeError('at load')\n\ndef main():\n    return 1\n",
            &FunctionCall::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.result, None);
    assert_eq!(outcome.exit_code, Some(0), "{:?}", outcome);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Guest), "{:?}", outcome);
    let error = outcome.error.unwrap();
    assert!(error.contains("Error while loading code"), "{}", error);
    assert!(error.contains("at load"), "{}", error);
}

#[tokio::test]
#[ignore = "requires uv and a Python download"]
async fn test_real_async_function() {
    let sandbox = real_sandbox();
    let call = FunctionCall::new("main")
        .with_input_value(json!({"n": 3}))
        .asynchronous();
    let outcome = sandbox
        .run_function(
            "import asyncio\n\nasync def main(n):\n    await asyncio.sleep(0.01)\n    return [n] * n\n",
            &call,
        )
        .await
        .unwrap();
    assert_eq!(outcome.result, Some(json!([3, 3, 3])), "{:?}", outcome);
}

#[tokio::test]
#[ignore = "requires uv and a Python download"]
async fn test_real_unserializable_result() {
    let sandbox = real_sandbox();
    let outcome = sandbox
        .run_function("def main():\n    return object()\n", &FunctionCall::default())
        .await
        .unwrap();
    assert!(outcome.error.unwrap().contains("not JSON serializable"));
}
