//! Work request types.

use serde::{Deserialize, Serialize};

/// One input the build tool has digested for this request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Path of the input, relative to the execution root.
    pub path: String,
    /// Content digest. Empty when the tool did not digest this input.
    #[serde(default)]
    pub digest: String,
}

impl Input {
    /// Create a new input entry.
    pub fn new(path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
        }
    }

    /// Whether the build tool supplied a digest for this input.
    pub fn is_digested(&self) -> bool {
        !self.digest.is_empty()
    }
}

/// Work request envelope (Bazel JSON worker protocol).
///
/// One request per line on the worker's stdin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRequest {
    /// Command-line arguments. Argument 0 carries the JSON compile request.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Inputs with their content digests.
    #[serde(default)]
    pub inputs: Vec<Input>,
    /// Caller-chosen request ID; 0 for singleplex workers.
    #[serde(default)]
    pub request_id: i32,
    /// Requested diagnostic verbosity; values above 0 enable verbose output.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub verbosity: i32,
    /// Sandbox directory for multiplex sandboxing, unused by this worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_dir: Option<String>,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

impl WorkRequest {
    /// Create a request from arguments and inputs.
    pub fn new(arguments: Vec<String>, inputs: Vec<Input>) -> Self {
        Self {
            arguments,
            inputs,
            ..Self::default()
        }
    }

    /// The raw compile payload (argument 0), if present.
    pub fn payload(&self) -> Option<&str> {
        self.arguments.first().map(String::as_str)
    }

    /// Inputs that carry a digest.
    pub fn digested_inputs(&self) -> impl Iterator<Item = &Input> {
        self.inputs.iter().filter(|input| input.is_digested())
    }

    /// Whether the build tool asked for verbose output.
    pub fn is_verbose(&self) -> bool {
        self.verbosity > 0
    }
}
