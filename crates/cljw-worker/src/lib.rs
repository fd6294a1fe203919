//! cljw Worker
//!
//! The environment cache and request dispatcher behind the `cljw` persistent
//! compile worker. Requests arrive as newline-delimited JSON on stdin; each
//! one is planned in the *tooling* environment, compiled in the *compile*
//! environment, and answered with a single JSON response on stdout.
//!
//! Environments are expensive to start, so both roles keep their last
//! environment alive between requests and only discard it when a tracked
//! classpath digest changes or the guest compiler asks for it.
//!
//! This crate can be used in two modes:
//! - **Process-backed**: [`ProcessEnvironmentFactory`] spawns a guest host
//!   per environment
//! - **In-process mock**: [`mock::MockFactory`] records every environment
//!   operation for tests

pub mod cache;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod environment;
pub mod identity;
pub mod mock;
pub mod roles;
pub mod rpc;
pub mod transcript;

pub use cache::{Acquired, Acquisition, CacheEntry, CacheError, CacheResult, CacheStats, EnvironmentCache};
pub use config::{EntryPoints, GuestConfig, WorkerConfig};
pub use digest::{compare, fingerprint_locations, DigestComparison, DigestMap};
pub use dispatcher::{DispatchError, Dispatcher};
pub use environment::{
    Environment, EnvironmentError, EnvironmentFactory, Invocation, ProcessEnvironment,
    ProcessEnvironmentFactory,
};
pub use identity::{EnvironmentId, EnvironmentIds, UnitId};
pub use roles::{Role, RoleCaches};
pub use rpc::{LoopSummary, WorkerLoop};
pub use transcript::Transcript;
