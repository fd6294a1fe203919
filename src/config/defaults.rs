//! Built-in defaults (layer 1) and the settings schema.

use serde::{Deserialize, Serialize};

use cljw_worker::WorkerConfig;

/// Default tracing filter.
pub const DEFAULT_LOG_FILTER: &str = "cljw=info";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `CLJW_LOG` takes precedence.
    pub filter: String,
    /// Colored output on stderr.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            ansi: false,
        }
    }
}

/// Every setting, as deserialized from the merged layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Settings {
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
