//! Artifact generation for guest scripts.
//!
//! Every artifact starts with an inline script metadata block that `uv run` reads to
//! provision dependencies. Plain artifacts append the guest code verbatim. Function
//! artifacts wrap the guest code with a trailer that calls one function with decoded
//! keyword arguments and always finishes stdout with a single JSON line.
//!
//! Generation is a pure function of its inputs: the same code, dependencies, inputs
//! and function name give a byte-identical artifact.

pub mod dependencies;

pub use dependencies::{Dependencies, DependencySpec};

use crate::codec::encode_inputs;
use crate::errors::{CodecError, SandboxError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_REQUIRES_PYTHON: &str = ">=3.10";

const INPUTS_PLACEHOLDER: &str = "__SANDKIT_INPUTS__";
const CALL_PLACEHOLDER: &str = "__SANDKIT_CALL__";

const EMITTER: &str = r#"def __sandkit_emit(payload):
    try:
        line = json.dumps(payload, ensure_ascii=False, allow_nan=False)
    except Exception as dump_error:
        message = f"Fatal: could not dump final output: {dump_error}"
        print(message, file=sys.stderr)
        line = json.dumps({"error": message})
    sys.stdout.flush()
    sys.stdout.write("\n" + line + "\n")
    sys.stdout.flush()


def __sandkit_excepthook(exc_type, exc_value, exc_tb):
    details = "".join(traceback.format_exception(exc_type, exc_value, exc_tb))
    message = f"Error while loading code: {exc_type.__name__}: {exc_value}\n{details}"
    print(message, file=sys.stderr)
    __sandkit_emit({"error": message})
    sys.stderr.flush()
    # The error line is the reply; a nonzero status would outrank it
    os._exit(0)


sys.excepthook = __sandkit_excepthook
"#;

const TRAILER: &str = r#"

if __name__ == "__main__":
    __sandkit_payload = {}
    __sandkit_value = None
    try:
        __sandkit_inputs = json.loads(base64.b64decode("__SANDKIT_INPUTS__").decode("utf-8"))
        __sandkit_value = __SANDKIT_CALL__
    except BaseException as exc:
        message = f"Error during execution: {type(exc).__name__}: {exc}\n{traceback.format_exc()}"
        print(message, file=sys.stderr)
        __sandkit_payload["error"] = message

    if "error" not in __sandkit_payload:
        try:
            json.dumps(__sandkit_value, ensure_ascii=False, allow_nan=False)
            __sandkit_payload["result"] = __sandkit_value
        except (TypeError, ValueError) as serialization_error:
            message = f"Function result not JSON serializable: {serialization_error}"
            print(message, file=sys.stderr)
            __sandkit_payload["error"] = message

    __sandkit_emit(__sandkit_payload)
"#;

/// Target function and keyword arguments for a function-call artifact
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub inputs: Option<Value>,
    pub is_async: bool,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: None,
            is_async: false,
        }
    }

    /// Attach keyword arguments from any serializable value
    pub fn with_inputs<T: Serialize + ?Sized>(mut self, inputs: &T) -> Result<Self, CodecError> {
        let value = serde_json::to_value(inputs).map_err(|e| {
            CodecError::Encoding(format!("inputs are not JSON serializable: {}", e))
        })?;
        self.inputs = Some(value);
        Ok(self)
    }

    pub fn with_input_value(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

impl Default for FunctionCall {
    fn default() -> Self {
        Self::new("main")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptBuilder {
    dependencies: Dependencies,
    requires_python: String,
}

impl ScriptBuilder {
    pub fn new(dependencies: Dependencies) -> Self {
        Self {
            dependencies,
            requires_python: DEFAULT_REQUIRES_PYTHON.to_string(),
        }
    }

    pub fn with_requires_python(mut self, requires_python: impl Into<String>) -> Self {
        self.requires_python = requires_python.into();
        self
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Inline metadata block declaring the runtime and dependencies
    pub fn header(&self) -> String {
        let mut header = String::from("# /// script\n");
        header.push_str(&format!(
            "# requires-python = {}\n",
            toml_quote(&self.requires_python)
        ));
        if self.dependencies.is_empty() {
            header.push_str("# dependencies = []\n");
        } else {
            header.push_str("# dependencies = [\n");
            for specifier in self.dependencies.specifiers() {
                header.push_str(&format!("#     {},\n", toml_quote(&specifier)));
            }
            header.push_str("# ]\n");
        }
        header.push_str("# ///\n");
        header
    }

    /// Plain artifact: header followed by the guest code, nothing else
    pub fn build_script(&self, code: &str) -> String {
        let mut script = self.header();
        script.push_str(code);
        if !code.ends_with('\n') {
            script.push('\n');
        }
        script
    }

    /// Function-call artifact speaking the `{"result"|"error"}` protocol
    pub fn build_function_call(
        &self,
        code: &str,
        call: &FunctionCall,
    ) -> Result<String, SandboxError> {
        validate_identifier(&call.name)?;
        let encoded_inputs = encode_inputs(call.inputs.as_ref())
            .map_err(|e| SandboxError::InvalidRequest(e.to_string()))?;
        Ok(self.render_function_call(code, call, &encoded_inputs))
    }

    pub(crate) fn render_function_call(
        &self,
        code: &str,
        call: &FunctionCall,
        encoded_inputs: &str,
    ) -> String {
        let b64_inputs = BASE64.encode(encoded_inputs.as_bytes());
        let call_expr = if call.is_async {
            format!("asyncio.run({}(**__sandkit_inputs))", call.name)
        } else {
            format!("{}(**__sandkit_inputs)", call.name)
        };

        let mut script = self.header();
        script.push('\n');
        if call.is_async {
            script.push_str("import asyncio\n");
        }
        script.push_str("import base64\nimport json\nimport os\nimport sys\nimport traceback\n\n\n");
        script.push_str(EMITTER);
        script.push_str("\n# --- guest code ---\n");
        script.push_str(code);
        if !code.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("# --- end guest code ---\n");
        script.push_str(
            &TRAILER
                .replace(INPUTS_PLACEHOLDER, &b64_inputs)
                .replace(CALL_PLACEHOLDER, &call_expr),
        );
        script
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new(Dependencies::new())
    }
}

fn toml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

pub(crate) fn validate_identifier(name: &str) -> Result<(), SandboxError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_alphabetic() => {
            chars.all(|c| c == '_' || c.is_alphanumeric())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SandboxError::InvalidRequest(format!(
            "'{}' is not a valid function name",
            name
        )))
    }
}
