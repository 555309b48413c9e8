//! JSON codec for the function-call protocol.
//!
//! Inputs travel to the guest as compact JSON (base64 wrapped by the script builder).
//! The guest answers with a single JSON object on its last stdout line, either
//! `{"result": <value>}` or `{"error": "<message>"}`.

use crate::errors::CodecError;
use serde_json::Value;

/// Character budget for output excerpts embedded in error messages
pub const PREVIEW_CHARS: usize = 1000;

/// Byte budget for stdout/stderr kept on a failed outcome
pub const MAX_RETAINED_OUTPUT_BYTES: usize = 64 * 1024;

/// The guest's decoded reply. At least one field is set.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestReply {
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Serialize call inputs to compact JSON. `None` encodes as an empty mapping.
pub fn encode_inputs(inputs: Option<&Value>) -> Result<String, CodecError> {
    match inputs {
        None => Ok("{}".to_string()),
        Some(value @ Value::Object(_)) => {
            serde_json::to_string(value).map_err(|e| {
                CodecError::Encoding(format!("inputs are not JSON serializable: {}", e))
            })
        }
        Some(other) => Err(CodecError::Encoding(format!(
            "inputs must be a JSON object of keyword arguments, got {}",
            json_type_name(other)
        ))),
    }
}

/// Decode the guest reply from captured stdout.
///
/// Only the last non-blank line is parsed, so anything the guest printed before the
/// protocol line is ignored here (it is still kept in the outcome's stdout).
pub fn decode_outcome(stdout: &str) -> Result<GuestReply, CodecError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");

    let value: Value = serde_json::from_str(line).map_err(|e| CodecError::Decoding {
        message: e.to_string(),
        preview: preview(stdout, PREVIEW_CHARS),
    })?;

    let Value::Object(mut map) = value else {
        return Err(CodecError::NotAnObject {
            preview: preview(stdout, PREVIEW_CHARS),
        });
    };

    let result = map.remove("result");
    let error = map.remove("error").map(|error| match error {
        Value::String(message) => message,
        other => other.to_string(),
    });

    if result.is_none() && error.is_none() {
        return Err(CodecError::MissingKeys {
            preview: preview(stdout, PREVIEW_CHARS),
        });
    }

    Ok(GuestReply { result, error })
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Cap a captured stream at `MAX_RETAINED_OUTPUT_BYTES`, cutting on a char boundary.
pub fn bound_output(text: &str) -> String {
    if text.len() <= MAX_RETAINED_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut cut = MAX_RETAINED_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [truncated {} bytes]",
        &text[..cut],
        text.len() - cut
    )
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
