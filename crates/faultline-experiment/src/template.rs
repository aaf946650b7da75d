//! Declarative experiment template model.
//!
//! Parses experiment template documents into `ExperimentTemplate` structs. The
//! field names follow the deployable artifact, so the same document can be
//! validated here and handed to the control plane unchanged.
//!
//! # Example YAML
//!
//! ```yaml
//! description: If 50% of tasks are stopped then availability will not be impacted
//! actions:
//!   stop-tasks:
//!     actionId: aws:ecs:stop-task
//!     targets:
//!       Tasks: ecs-tasks
//!   wait:
//!     actionId: aws:fis:wait
//!     parameters:
//!       duration: PT20M
//!     startAfter: [stop-tasks]
//! targets:
//!   ecs-tasks:
//!     resourceType: aws:ecs:task
//!     resourceTags:
//!       aws:ecs:clusterName: test-fargate
//!     filters:
//!       - path: LastStatus
//!         values: [RUNNING]
//!     selectionMode: PERCENT(50)
//! stopConditions:
//!   - source: aws:cloudwatch:alarm
//!     value: arn:aws:cloudwatch:{{region}}:{{account}}:alarm:Everythings on fire
//! experimentOptions:
//!   accountTargeting: single-account
//!   emptyTargetResolutionMode: fail
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExperimentError, Result};
use crate::selection::SelectionMode;

/// Stop-condition source that never triggers and carries no alarm.
pub const STOP_CONDITION_NONE: &str = "none";

/// A complete experiment template.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentTemplate {
    /// Human-readable hypothesis the experiment checks.
    #[serde(default)]
    pub description: String,

    /// Actions keyed by name, in declaration order.
    #[serde(default)]
    pub actions: IndexMap<String, Action>,

    /// Target groups keyed by name, in declaration order.
    #[serde(default)]
    pub targets: IndexMap<String, TargetSpec>,

    /// Conditions that abort the run; any one triggering is enough.
    #[serde(default)]
    pub stop_conditions: Vec<StopCondition>,

    /// Role the control plane assumes to run the actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub experiment_options: ExperimentOptions,
}

/// One step of an experiment.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Fault-injection capability, e.g. `aws:ecs:stop-task`.
    pub action_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Role name → target name.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,

    /// Actions that must reach a terminal state before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_after: Vec<String>,
}

/// A named, filterable resource selection.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    pub resource_type: String,

    /// Explicit resource ids; when set, candidates are restricted to these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_arns: Vec<String>,

    /// Tags that must all be present with these values.
    #[serde(default)]
    pub resource_tags: BTreeMap<String, String>,

    /// Attribute filters; all must match.
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Raw selection mode; parsed by [`TargetSpec::selection`].
    pub selection_mode: String,
}

impl TargetSpec {
    /// Parse the selection mode string.
    pub fn selection(&self) -> std::result::Result<SelectionMode, String> {
        self.selection_mode.parse()
    }
}

/// Keep only resources whose attribute at `path` is one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Filter {
    /// Dot-separated attribute path, e.g. `LastStatus` or `Attachments.Status`.
    pub path: String,
    pub values: Vec<String>,
}

/// An external alarm that aborts the run when it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct StopCondition {
    /// Alarm provider identifier, e.g. `aws:cloudwatch:alarm`, or `none`.
    pub source: String,

    /// Opaque alarm reference understood by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Run-wide options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentOptions {
    #[serde(default)]
    pub account_targeting: AccountTargeting,

    #[serde(default)]
    pub empty_target_resolution_mode: EmptyTargetResolutionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountTargeting {
    #[default]
    SingleAccount,
    MultiAccount,
}

/// What to do when a target resolves to zero resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTargetResolutionMode {
    /// Fail the run before any action is dispatched.
    #[default]
    Fail,
    /// Skip the actions that depend only on empty targets.
    Skip,
}

/// Serialization format of a template document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Json,
    Yaml,
    Toml,
}

impl TemplateFormat {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(TemplateFormat::Json),
            "yaml" | "yml" => Some(TemplateFormat::Yaml),
            "toml" => Some(TemplateFormat::Toml),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TemplateFormat::Json => "JSON",
            TemplateFormat::Yaml => "YAML",
            TemplateFormat::Toml => "TOML",
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl ExperimentTemplate {
    /// Parse a template in the given format.
    pub fn parse(input: &str, format: TemplateFormat) -> Result<Self> {
        let parse_err = |message: String| ExperimentError::Parse {
            format: format.name().to_string(),
            message,
        };
        match format {
            TemplateFormat::Json => serde_json::from_str(input).map_err(|e| parse_err(e.to_string())),
            TemplateFormat::Yaml => serde_yaml::from_str(input).map_err(|e| parse_err(e.to_string())),
            TemplateFormat::Toml => toml::from_str(input).map_err(|e| parse_err(e.to_string())),
        }
    }

    pub fn from_json(input: &str) -> Result<Self> {
        Self::parse(input, TemplateFormat::Json)
    }

    pub fn from_yaml(input: &str) -> Result<Self> {
        Self::parse(input, TemplateFormat::Yaml)
    }

    /// Load a template from a file, choosing the format by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let format = TemplateFormat::from_path(path).ok_or_else(|| ExperimentError::Parse {
            format: "unknown".to_string(),
            message: format!("unsupported template extension: {}", path.display()),
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| ExperimentError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let template = Self::parse(&content, format)?;
        debug!(
            path = %path.display(),
            actions = template.actions.len(),
            targets = template.targets.len(),
            "Parsed experiment template"
        );
        Ok(template)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExperimentError::Parse {
            format: "JSON".to_string(),
            message: e.to_string(),
        })
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ExperimentError::Parse {
            format: "YAML".to_string(),
            message: e.to_string(),
        })
    }

    /// Names of the actions bound to `target` through any role.
    pub fn actions_using_target(&self, target: &str) -> Vec<String> {
        self.actions
            .iter()
            .filter(|(_, action)| action.targets.values().any(|t| t == target))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
