//! Execution environments.
//!
//! An environment is an append-only sandbox: it starts empty, can only grow
//! by loading more classpath locations, and is discarded as a whole. It is
//! never shrunk and a single unit is never reloaded in place.

mod process;

pub use process::{ProcessEnvironment, ProcessEnvironmentFactory};

use std::collections::BTreeSet;
use std::io;

use serde_json::Value;
use thiserror::Error;

use cljw_protocol::FrameError;

use crate::identity::{EnvironmentId, UnitId};
use crate::roles::Role;

/// Errors from environment operations.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("failed to start guest host '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot load classpath location '{location}': {reason}")]
    Resolution { location: String, reason: String },

    #[error("{entry_point} raised: {message}")]
    Guest {
        entry_point: String,
        message: String,
        output: String,
    },

    #[error("guest host channel error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("guest host closed its channel")]
    Closed,

    #[error("invalid guest command: {0}")]
    InvalidCommand(String),
}

/// Result of one entry-point call.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Value returned by the entry point.
    pub value: Value,
    /// Text the guest printed during the call.
    pub output: String,
}

/// A live execution environment.
pub trait Environment {
    /// Instance identity; never shared with another environment.
    fn id(&self) -> EnvironmentId;

    /// Role this environment was created for.
    fn role(&self) -> Role;

    /// Locations loaded so far, in load order.
    fn locations(&self) -> &[String];

    /// Whether `location` is already loaded.
    fn has_location(&self, location: &str) -> bool {
        self.locations().iter().any(|loaded| loaded == location)
    }

    /// Append a location. Idempotent: returns `Ok(false)` if it was already
    /// loaded.
    fn add_location(&mut self, location: &str) -> Result<bool, EnvironmentError>;

    /// Run an entry point synchronously.
    fn invoke(&mut self, entry_point: &str, payload: &str) -> Result<Invocation, EnvironmentError>;

    /// Units the guest has defined in this environment. Redefining a unit
    /// does not add a second entry.
    fn units(&self) -> &BTreeSet<UnitId>;

    /// Release every resource. The environment cannot be used afterwards.
    fn discard(self: Box<Self>) -> Result<(), EnvironmentError>;
}

/// Creates empty environments.
pub trait EnvironmentFactory {
    fn create(&mut self, role: Role) -> Result<Box<dyn Environment>, EnvironmentError>;
}
