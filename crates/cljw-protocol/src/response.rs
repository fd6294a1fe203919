//! Work response types.

use serde::{Deserialize, Serialize};

use crate::{EXIT_FAILURE, EXIT_SUCCESS};

/// Work response envelope (Bazel JSON worker protocol).
///
/// One response per request, written as a single line on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkResponse {
    /// 0 on success, nonzero on failure.
    pub exit_code: i32,
    /// Diagnostic text captured while processing the request.
    #[serde(default)]
    pub output: String,
    /// Request ID echoed from the request.
    #[serde(default)]
    pub request_id: i32,
    /// Set when the request was cancelled before completion.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub was_cancelled: bool,
}

impl WorkResponse {
    /// Create a success response.
    pub fn success(request_id: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_SUCCESS,
            output: output.into(),
            request_id,
            was_cancelled: false,
        }
    }

    /// Create a failure response.
    pub fn failure(request_id: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_FAILURE,
            output: output.into(),
            request_id,
            was_cancelled: false,
        }
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}
