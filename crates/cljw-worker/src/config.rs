//! Worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use cljw_protocol::DEFAULT_MAX_MESSAGE_BYTES;

/// Guest entry points called for each request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct EntryPoints {
    /// Tooling role: turns the raw request into a compilation script.
    pub plan: String,
    /// Compile role: evaluates the script and returns the signal.
    pub compile: String,
    /// Tooling role: assembles the output archive. Empty disables packaging.
    pub package: String,
}

impl EntryPoints {
    /// The packaging entry point, if packaging is enabled.
    pub fn package(&self) -> Option<&str> {
        if self.package.is_empty() {
            None
        } else {
            Some(&self.package)
        }
    }
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            plan: "rules-clojure.jar/get-compilation-script-json".to_string(),
            compile: "rules-clojure.compile/eval-script".to_string(),
            package: "rules-clojure.jar/create-jar-json".to_string(),
        }
    }
}

/// How guest hosts are started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct GuestConfig {
    /// Program and arguments of the guest host.
    pub command: Vec<String>,
    /// The worker's own implementation classpath, loaded into the tooling role.
    pub tooling_classpath: Vec<String>,
    /// How long a guest host may take to exit after `shutdown`.
    pub shutdown_grace_ms: u64,
    /// Digest the tooling classpath archives once at startup.
    pub fingerprint_tooling: bool,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            command: vec!["cljw-guest".to_string()],
            tooling_classpath: Vec::new(),
            shutdown_grace_ms: 2000,
            fingerprint_tooling: true,
        }
    }
}

/// Worker configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct WorkerConfig {
    /// Guest entry points.
    pub entry_points: EntryPoints,
    /// Automatic retries after a `restart` signal before the request fails.
    pub max_restarts: u32,
    /// Maximum size of one framed message in bytes.
    pub max_message_bytes: usize,
    /// Guest host settings.
    pub guest: GuestConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            entry_points: EntryPoints::default(),
            max_restarts: 1,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            guest: GuestConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Grace period for guest host shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.guest.shutdown_grace_ms)
    }

    /// Describe every invalid setting. Empty when the config is usable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.entry_points.plan.is_empty() {
            problems.push("worker.entry-points.plan must not be empty".to_string());
        }
        if self.entry_points.compile.is_empty() {
            problems.push("worker.entry-points.compile must not be empty".to_string());
        }
        if self.guest.command.first().map_or(true, |program| program.is_empty()) {
            problems.push("worker.guest.command must name a program".to_string());
        }
        if self.max_message_bytes < 1024 {
            problems.push(format!(
                "worker.max-message-bytes must be at least 1024, got {}",
                self.max_message_bytes
            ));
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(WorkerConfig::default().problems().is_empty());
        assert_eq!(WorkerConfig::default().max_restarts, 1);
    }

    #[test]
    fn test_empty_package_disables_packaging() {
        let mut entry_points = EntryPoints::default();
        assert!(entry_points.package().is_some());
        entry_points.package.clear();
        assert_eq!(entry_points.package(), None);
    }

    #[test]
    fn test_problems_reported() {
        let mut config = WorkerConfig::default();
        config.guest.command.clear();
        config.entry_points.compile.clear();
        let problems = config.problems();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"max-restarts":3,"guest":{"command":["java","-jar","g.jar"]}}"#)
                .unwrap();
        assert_eq!(config.max_restarts, 3);
        assert_eq!(config.guest.command, vec!["java", "-jar", "g.jar"]);
        assert_eq!(config.guest.shutdown_grace_ms, 2000);
        assert_eq!(config.entry_points, EntryPoints::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result: Result<WorkerConfig, _> = serde_json::from_str(r#"{"max_restarts":3}"#);
        assert!(result.is_err());
    }
}
