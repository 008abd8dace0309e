//! Configuration management for Callgate.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `CALLGATE__*` environment variables (`CALLGATE__DEMO__REQUESTS=5` sets
//! `demo.requests`).

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "CALLGATE";

/// Main configuration for the Callgate binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Path to a rule file; the stock rule set is used when unset
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Load generation settings for the demo run
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Demo run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of concurrent calls to issue
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Simulated latency of each call in milliseconds
    #[serde(default = "default_action_latency")]
    pub action_latency_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            action_latency_ms: default_action_latency(),
        }
    }
}

fn default_requests() -> usize {
    15
}

fn default_action_latency() -> u64 {
    100
}

impl GateConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| GateError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();

        assert_eq!(config.rules_path, None);
        assert_eq!(config.log.level, "info");
        assert!(!config.log.json);
        assert_eq!(config.demo.requests, 15);
        assert_eq!(config.demo.action_latency_ms, 100);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: GateConfig = serde_yaml::from_str("demo:\n  requests: 4\n").unwrap();

        assert_eq!(config.demo.requests, 4);
        assert_eq!(config.demo.action_latency_ms, 100);
        assert_eq!(config.log, LogConfig::default());
    }

    #[test]
    fn test_load_layers_file_over_defaults() {
        let path = write_temp(
            "callgate-layered.yaml",
            "rules_path: rules.yaml\nlog:\n  json: true\n",
        );

        let config = GateConfig::load(path.to_str()).unwrap();

        assert_eq!(config.rules_path.as_deref(), Some("rules.yaml"));
        assert!(config.log.json);
        assert_eq!(config.log.level, "info");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = GateConfig::load(Some("/nonexistent/callgate.yaml")).unwrap_err();
        assert!(matches!(err, GateError::Config(_)));
    }
}
