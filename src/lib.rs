//! cljw - persistent Clojure compile worker
//!
//! The `cljw` binary speaks the build tool's JSON worker protocol on
//! stdin/stdout and keeps two guest environments alive between requests:
//! one for the worker's own tooling, one for the client's classpath. See
//! [`cljw_worker`] for the cache and dispatcher, [`cljw_protocol`] for the
//! wire types.
//!
//! This crate adds the process shell around them: layered configuration,
//! logging setup, and the single-shot ephemeral mode.

pub mod config;
pub mod ephemeral;
pub mod logging;

pub use config::{ConfigError, EffectiveConfig, LoggingConfig, Settings};
pub use ephemeral::{expand_flagfiles, run_once};

pub use cljw_protocol as protocol;
pub use cljw_worker as worker;
