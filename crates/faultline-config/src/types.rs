//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [environment]            # account / region / partition for rendering
//! [executor]               # concurrency and handler timeout
//! [monitor]                # stop-condition polling
//! [logging]                # log level and JSON file output
//! [templates]              # template directory
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorSection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates: Option<TemplatesConfig>,
}

impl FaultlineConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole; a section absent from `other` is kept.
    pub fn merge(&mut self, other: FaultlineConfig) {
        if other.environment.is_some() {
            self.environment = other.environment;
        }
        if other.executor.is_some() {
            self.executor = other.executor;
        }
        if other.monitor.is_some() {
            self.monitor = other.monitor;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if other.templates.is_some() {
            self.templates = other.templates;
        }
    }

    /// `[environment]`, or its defaults.
    pub fn environment(&self) -> EnvironmentConfig {
        self.environment.clone().unwrap_or_default()
    }

    /// `[executor]`, or its defaults.
    pub fn executor(&self) -> ExecutorSection {
        self.executor.clone().unwrap_or_default()
    }

    /// `[monitor]`, or its defaults.
    pub fn monitor(&self) -> MonitorConfig {
        self.monitor.clone().unwrap_or_default()
    }

    /// `[logging]`, or its defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Check values serde cannot: zero limits and intervals.
    pub fn validate(&self) -> Result<()> {
        let executor = self.executor();
        if executor.max_concurrent_actions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.max_concurrent_actions".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if executor.action_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor.action_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let monitor = self.monitor();
        if monitor.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.poll_interval_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if monitor.triggering_states.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "monitor.triggering_states".to_string(),
                reason: "must name at least one alarm state".to_string(),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Construction-time variables substituted into templates.
///
/// ```toml
/// [environment]
/// account = "123456789012"
/// region = "eu-west-1"
///
/// [environment.vars]
/// cluster = "test-fargate"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub account: Option<String>,
    pub region: Option<String>,
    pub partition: String,
    /// Extra placeholder variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            account: None,
            region: None,
            partition: "aws".to_string(),
            vars: BTreeMap::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Experiment executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Maximum action handlers running at once.
    pub max_concurrent_actions: usize,
    /// Seconds before a running handler is failed.
    pub action_timeout_secs: u64,
    /// Cancel running handlers when a run stops instead of letting them finish.
    pub interrupt_in_flight: bool,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_concurrent_actions: 8,
            action_timeout_secs: 3600,
            interrupt_in_flight: false,
        }
    }
}

impl ExecutorSection {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Monitor Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Stop-condition monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Milliseconds between alarm polls.
    pub poll_interval_ms: u64,
    /// Alarm states that abort a run.
    pub triggering_states: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            triggering_states: vec!["ALARM".to_string()],
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `faultline_experiment=debug`.
    pub level: Option<String>,
    /// Also write daily-rotated JSON logs.
    pub json_file: bool,
    /// Directory for JSON log files.
    pub directory: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Templates Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where experiment templates live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub dir: Option<PathBuf>,
}
