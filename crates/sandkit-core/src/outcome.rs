//! Turning a raw backend outcome into a function-call outcome.

use crate::codec::{decode_outcome, preview, PREVIEW_CHARS};
use crate::executors::{ErrorKind, Outcome};

const RUNNER_STDERR_MARKER: &str = "\n--- Runner Stderr ---\n";

/// Decode the guest reply from `raw` and fold it into the outcome.
///
/// A backend failure is passed through untouched. Otherwise the last stdout line
/// decides: a guest `error` wins over any `result` sent alongside it.
pub fn assemble_function_outcome(raw: Outcome) -> Outcome {
    if raw.error.is_some() {
        return raw;
    }

    if raw.stdout.trim().is_empty() && !raw.stderr.is_empty() {
        let message = format!(
            "Execution failed (no stdout). Stderr: {}",
            preview(raw.stderr.trim(), PREVIEW_CHARS)
        );
        return raw.fail(ErrorKind::NoOutput, message);
    }

    let reply = match decode_outcome(&raw.stdout) {
        Ok(reply) => reply,
        Err(e) => return raw.fail(ErrorKind::Decoding, e.to_string()),
    };

    match reply.error {
        Some(guest_error) => {
            let mut message = format!("Script Error: {}", guest_error);
            let remainder = raw.stderr.replacen(&guest_error, "", 1);
            if !remainder.trim().is_empty() {
                message.push_str(RUNNER_STDERR_MARKER);
                message.push_str(remainder.trim());
            }

            let mut outcome = raw;
            if !outcome.stderr.contains(&guest_error) {
                if !outcome.stderr.is_empty() && !outcome.stderr.ends_with('\n') {
                    outcome.stderr.push('\n');
                }
                outcome.stderr.push_str(&guest_error);
            }
            outcome.result = reply.result;
            outcome.fail(ErrorKind::Guest, message)
        }
        None => Outcome {
            result: reply.result,
            ..raw
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(stdout: &str, stderr: &str) -> Outcome {
        Outcome::new(stdout, stderr).with_exit_code(Some(0))
    }

    #[test]
    fn test_result_is_decoded() {
        let outcome = assemble_function_outcome(raw("chatter\n{\"result\": {\"sum\": 3}}\n", ""));
        assert!(outcome.is_success());
        assert_eq!(outcome.result, Some(json!({"sum": 3})));
        assert_eq!(outcome.error_kind, None);
        assert!(outcome.stdout.contains("chatter"));
    }

    #[test]
    fn test_backend_error_passes_through() {
        let failed = raw("", "killed").fail(ErrorKind::Timeout, "Timeout error: took too long");
        let outcome = assemble_function_outcome(failed.clone());
        assert_eq!(outcome, failed);
    }

    #[test]
    fn test_blank_stdout_with_stderr() {
        let outcome = assemble_function_outcome(raw("  \n", "ModuleNotFoundError: nope\n"));
        assert_eq!(outcome.error_kind, Some(ErrorKind::NoOutput));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Execution failed (no stdout). Stderr: ModuleNotFoundError: nope")
        );
    }

    #[test]
    fn test_undecodable_stdout() {
        let outcome = assemble_function_outcome(raw("not json", ""));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Decoding));
        assert!(outcome.error.unwrap().contains("Decoding error"));

        let outcome = assemble_function_outcome(raw("", ""));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Decoding));

        let outcome = assemble_function_outcome(raw(r#"{"value": 1}"#, ""));
        assert!(outcome.error.unwrap().contains("missing 'result' or 'error'"));
    }

    #[test]
    fn test_guest_error_without_stderr() {
        let outcome = assemble_function_outcome(raw(r#"{"error": "ValueError: Bad input"}"#, ""));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Guest));
        assert_eq!(outcome.error.as_deref(), Some("Script Error: ValueError: Bad input"));
        assert_eq!(outcome.stderr, "ValueError: Bad input");
        assert_eq!(outcome.result, None);
    }

    #[test]
    fn test_guest_error_merges_other_stderr() {
        let outcome = assemble_function_outcome(raw(
            r#"{"error": "ValueError: Bad input"}"#,
            "Installed 2 packages\n",
        ));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Script Error: ValueError: Bad input\n--- Runner Stderr ---\nInstalled 2 packages")
        );
        assert_eq!(outcome.stderr, "Installed 2 packages\nValueError: Bad input");
    }

    #[test]
    fn test_guest_error_already_in_stderr() {
        let outcome = assemble_function_outcome(raw(
            r#"{"error": "boom"}"#,
            "boom",
        ));
        assert_eq!(outcome.error.as_deref(), Some("Script Error: boom"));
        assert_eq!(outcome.stderr, "boom");

        let outcome = assemble_function_outcome(raw(
            r#"{"error": "boom"}"#,
            "warning: slow\nboom\n",
        ));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Script Error: boom\n--- Runner Stderr ---\nwarning: slow")
        );
        assert_eq!(outcome.stderr, "warning: slow\nboom\n");
    }

    #[test]
    fn test_error_wins_over_result() {
        let outcome = assemble_function_outcome(raw(r#"{"result": 1, "error": "late failure"}"#, ""));
        assert_eq!(outcome.error_kind, Some(ErrorKind::Guest));
        assert_eq!(outcome.result, Some(json!(1)));
        assert!(!outcome.is_success());
    }
}
