//! Rule configuration.
//!
//! Rules are plain "at most `max_calls` per `window_ms`" pairs, loaded from
//! YAML and turned into [`WindowTracker`]s. A rule file is either a bare list
//! or a mapping with a `rules` key:
//!
//! ```yaml
//! rules:
//!   - max_calls: 1
//!     window_ms: 5000
//!     name: per-5s
//!   - max_calls: 2
//!     window_ms: 15000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::clock::Clock;
use super::tracker::WindowTracker;
use crate::error::{GateError, Result};

/// A single rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Number of calls allowed per window
    pub max_calls: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Optional name used in log output
    #[serde(default)]
    pub name: Option<String>,
}

impl RuleConfig {
    /// Create an unnamed rule.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            name: None,
        }
    }

    /// Get the window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Check that the rule can ever admit a call.
    pub fn validate(&self) -> Result<()> {
        if self.max_calls == 0 {
            return Err(GateError::Config(format!(
                "rule {} must allow at least one call",
                self.label()
            )));
        }
        if self.window_ms == 0 {
            return Err(GateError::Config(format!(
                "rule {} must have a non-zero window",
                self.label()
            )));
        }
        Ok(())
    }

    /// Build a tracker for this rule.
    pub fn tracker<C: Clock>(&self, clock: C) -> WindowTracker<C> {
        let tracker = WindowTracker::with_clock(self.max_calls, self.window(), clock);
        match &self.name {
            Some(name) => tracker.named(name.clone()),
            None => tracker,
        }
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}/{}ms", self.max_calls, self.window_ms),
        }
    }
}

/// An ordered list of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for RuleSet {
    /// One call per 5s, two per 15s and three per 10s.
    fn default() -> Self {
        Self {
            rules: vec![
                RuleConfig::new(1, Duration::from_secs(5)),
                RuleConfig::new(2, Duration::from_secs(15)),
                RuleConfig::new(3, Duration::from_secs(10)),
            ],
        }
    }
}

impl RuleSet {
    /// Create a rule set from a list of rules.
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self { rules }
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string and validate them.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // A bare list of rules first, then the `rules:` mapping form
        let set = match serde_yaml::from_str::<Vec<RuleConfig>>(yaml) {
            Ok(rules) => RuleSet::new(rules),
            Err(_) => serde_yaml::from_str::<RuleSet>(yaml)?,
        };
        set.validate()?;
        Ok(set)
    }

    /// Validate every rule.
    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(RuleConfig::validate)
    }

    /// Build one tracker per rule, in order, all sharing `clock`.
    pub fn trackers<C: Clock>(&self, clock: C) -> Vec<WindowTracker<C>> {
        self.rules
            .iter()
            .map(|rule| rule.tracker(clock.clone()))
            .collect()
    }

    /// Number of rules in the set.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set has no rules, which admits every call.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
