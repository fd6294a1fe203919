//! Configuration merge system
//!
//! Implements the 3-layer configuration merge:
//! 1. Built-in defaults
//! 2. Config file (`--config` or `CLJW_CONFIG`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{LoggingConfig, Settings, DEFAULT_LOG_FILTER};
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, SCHEMA_ID};
pub use merge::{deep_merge, merge_layers};
