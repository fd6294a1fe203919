//! Logging setup.
//!
//! Everything goes to stderr: stdout is the work response channel.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable overriding `logging.filter`.
pub const LOG_ENV: &str = "CLJW_LOG";

/// Build the filter: `CLJW_LOG` if set and valid, else the configured one.
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .is_ok()
}
