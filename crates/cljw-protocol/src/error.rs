//! Error types reported back to the build tool.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes attached to failed work responses.
///
/// These codes are stable and appear verbatim in the response output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request payload or missing required fields.
    InvalidRequest,
    /// A classpath location could not be opened or loaded.
    ResolutionFailed,
    /// An execution environment could not be created or talked to.
    EnvironmentFailed,
    /// The guest compiler raised an error.
    CompilerFailed,
    /// The guest asked for a restart after the retry budget was spent.
    RestartLoop,
    /// The guest replied with something outside its contract.
    GuestProtocol,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::ResolutionFailed => write!(f, "RESOLUTION_FAILED"),
            Self::EnvironmentFailed => write!(f, "ENVIRONMENT_FAILED"),
            Self::CompilerFailed => write!(f, "COMPILER_FAILED"),
            Self::RestartLoop => write!(f, "RESTART_LOOP"),
            Self::GuestProtocol => write!(f, "GUEST_PROTOCOL"),
        }
    }
}

/// A request-level failure.
///
/// Never escapes the dispatcher: it is rendered into the output of a
/// failed [`WorkResponse`](crate::WorkResponse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WorkError {
    /// Create a new work error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new work error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create a RESOLUTION_FAILED error for a classpath location.
    pub fn resolution_failed(location: &str, reason: impl fmt::Display) -> Self {
        Self::with_data(
            ErrorCode::ResolutionFailed,
            format!("cannot load classpath location '{}': {}", location, reason),
            serde_json::json!({ "location": location }),
        )
    }

    /// Create a COMPILER_FAILED error.
    pub fn compiler_failed(entry_point: &str, message: impl fmt::Display) -> Self {
        Self::with_data(
            ErrorCode::CompilerFailed,
            format!("{} failed: {}", entry_point, message),
            serde_json::json!({ "entry_point": entry_point }),
        )
    }

    /// Create a RESTART_LOOP error.
    pub fn restart_loop(attempts: u32) -> Self {
        Self::with_data(
            ErrorCode::RestartLoop,
            format!("compiler requested a restart {} times in a row", attempts),
            serde_json::json!({ "attempts": attempts }),
        )
    }

    /// Create a GUEST_PROTOCOL error.
    pub fn guest_protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GuestProtocol, message)
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WorkError {}
