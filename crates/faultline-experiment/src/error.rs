//! Error types for experiment templates and runs.

use std::fmt;

use thiserror::Error;

/// Result type for experiment operations.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Errors that can occur while loading, validating or running an experiment.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// The template document could not be parsed.
    #[error("Failed to parse {format} template: {message}")]
    Parse { format: String, message: String },

    /// A template file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The template failed static validation.
    #[error("Invalid template: {0}")]
    Validation(ValidationErrors),

    /// The action graph could not be built.
    #[error("Invalid action graph: {0}")]
    Graph(#[from] GraphError),

    /// A target resolved to zero resources under the `fail` policy.
    #[error("Target '{target}' resolved to no resources (affects: {})", .actions.join(", "))]
    EmptyTarget { target: String, actions: Vec<String> },

    /// An action handler reported failure.
    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    /// An alarm source could not be reached.
    #[error("Alarm source '{source_id}' unavailable for '{alarm}': {reason}")]
    MonitorUnavailable {
        source_id: String,
        alarm: String,
        reason: String,
    },

    /// The resource inventory query failed.
    #[error("Inventory query for target '{target}' failed: {message}")]
    Inventory { target: String, message: String },

    /// Placeholder rendering failed.
    #[error("Render error: {0}")]
    Render(String),

    /// No handler is registered for an action kind.
    #[error("Unknown action kind: {0}")]
    UnknownActionKind(String),
}

impl From<ValidationErrors> for ExperimentError {
    fn from(errors: ValidationErrors) -> Self {
        ExperimentError::Validation(errors)
    }
}

/// A single static problem found in a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("template defines no actions")]
    NoActions,

    #[error("action '{action}' starts after unknown action '{predecessor}'")]
    UnknownPredecessor { action: String, predecessor: String },

    #[error("cycle in startAfter between actions: {}", .members.join(", "))]
    Cycle { members: Vec<String> },

    #[error("action '{action}' binds role '{role}' to unknown target '{target}'")]
    UnknownTarget {
        action: String,
        role: String,
        target: String,
    },

    #[error("target '{target}' has invalid selectionMode '{value}': {reason}")]
    InvalidSelectionMode {
        target: String,
        value: String,
        reason: String,
    },

    #[error("action '{action}' uses unknown action kind '{action_id}'")]
    UnknownActionKind { action: String, action_id: String },

    #[error("action '{action}' ({action_id}) is missing required parameter '{parameter}'")]
    MissingParameter {
        action: String,
        action_id: String,
        parameter: String,
    },

    #[error("action '{action}' has invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        action: String,
        parameter: String,
        reason: String,
    },

    #[error("action '{action}' ({action_id}) is missing required target role '{role}'")]
    MissingTargetRole {
        action: String,
        action_id: String,
        role: String,
    },

    #[error("stop condition #{index} ({source_id}) has no alarm reference")]
    MissingStopConditionValue { index: usize, source_id: String },

    #[error("stop condition #{index} uses unknown source '{source_id}'")]
    UnknownStopConditionSource { index: usize, source_id: String },
}

/// Every validation problem found in one pass over a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Structural problems in the `startAfter` relation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("action '{action}' starts after unknown action '{predecessor}'")]
    UnknownPredecessor { action: String, predecessor: String },

    #[error("cycle between actions: {}", .members.join(", "))]
    Cycle { members: Vec<String> },
}
