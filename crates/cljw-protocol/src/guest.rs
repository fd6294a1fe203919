//! Guest host protocol.
//!
//! Every execution environment is backed by a guest host: a runtime process
//! that owns the loaded classpath and runs the guest compiler. The worker
//! drives it with one [`GuestCommand`] per line on its stdin and reads one
//! [`GuestReply`] per line from its stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkError;

/// Keyword namespace the guest compiler uses for its signal tokens.
pub const SIGNAL_NAMESPACE: &str = "rules-clojure.compile";

/// Command sent from the worker to a guest host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum GuestCommand {
    /// Append a classpath location to the environment.
    AddLocation { path: String },
    /// Call an entry point with a raw string payload.
    Invoke {
        #[serde(rename = "entry-point")]
        entry_point: String,
        payload: String,
    },
    /// Release everything and exit.
    Shutdown,
}

/// Reply from a guest host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum GuestReply {
    Ok {
        /// Return value of the entry point (`null` for commands without one).
        #[serde(default)]
        value: Value,
        /// Text the guest printed while handling the command.
        #[serde(default)]
        output: String,
        /// Units the guest defined while handling the command.
        #[serde(default)]
        defined: Vec<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        output: String,
    },
}

impl GuestReply {
    /// Plain acknowledgement without a value.
    pub fn ack() -> Self {
        Self::Ok {
            value: Value::Null,
            output: String::new(),
            defined: Vec::new(),
        }
    }
}

/// Outcome of one compile invocation, as directed by the guest compiler.
///
/// This is expected control flow, not an error: the guest is the only party
/// that can tell when a definition in the live environment has gone stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `null`: success, keep the environment.
    Ok,
    /// `reload`: success, but discard the environment before the next request.
    OkThenInvalidate,
    /// `restart`: incompatible with the live environment; discard it and
    /// retry the same request on a fresh one.
    Retry,
}

impl Signal {
    /// Decode the value returned by the compile entry point.
    ///
    /// Accepts `null`, the bare tokens `"reload"` / `"restart"`, and their
    /// keyword spellings `":rules-clojure.compile/reload"` /
    /// `":rules-clojure.compile/restart"`.
    pub fn from_value(value: &Value) -> Result<Self, WorkError> {
        match value {
            Value::Null => Ok(Self::Ok),
            Value::String(token) => Self::from_token(token).ok_or_else(|| {
                WorkError::guest_protocol(format!("unknown compile signal {:?}", token))
            }),
            other => Err(WorkError::guest_protocol(format!(
                "compile signal must be null or a string, got {}",
                other
            ))),
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        let name = match token.strip_prefix(':') {
            Some(keyword) => keyword
                .strip_prefix(SIGNAL_NAMESPACE)
                .and_then(|rest| rest.strip_prefix('/'))?,
            None => token,
        };
        match name {
            "reload" => Some(Self::OkThenInvalidate),
            "restart" => Some(Self::Retry),
            _ => None,
        }
    }

    /// Wire token for this signal (`None` for plain success).
    pub fn as_token(&self) -> Option<&'static str> {
        match self {
            Self::Ok => None,
            Self::OkThenInvalidate => Some("reload"),
            Self::Retry => Some("restart"),
        }
    }
}
