//! Runtime state of one experiment run and the report it leaves behind.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::alarm::AlarmState;
use crate::template::ExperimentTemplate;

/// Lifecycle state of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Waiting for predecessors or for dispatch.
    Pending,
    /// Never dispatched because the run was stopped.
    Blocked,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Blocked | ActionState::Completed | ActionState::Failed | ActionState::Skipped
        )
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    StoppedByCondition,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::StoppedByCondition
        )
    }
}

/// Why an action was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Every target it binds resolved to zero resources.
    EmptyTarget { targets: Vec<String> },
    /// A predecessor (direct or transitive) failed.
    UpstreamFailed { action: String },
}

/// What stopped a run early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopTrigger {
    /// A stop condition entered a triggering alarm state.
    StopCondition {
        index: usize,
        source: String,
        alarm: String,
        state: AlarmState,
    },
    /// The run was cancelled from outside.
    Operator,
}

/// Why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCause {
    /// A target resolved empty under the `fail` policy.
    EmptyTarget { target: String, actions: Vec<String> },
    /// The inventory could not resolve a target.
    TargetResolution { target: String, message: String },
    /// One or more actions failed; `skipped` lists what they took down with them.
    ActionsFailed {
        failed: Vec<String>,
        skipped: Vec<String>,
    },
}

/// Per-action record kept in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub name: String,
    pub action_id: String,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Completion record of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub description: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Outcomes in topological order.
    pub actions: Vec<ActionOutcome>,
    pub resolved_targets: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_trigger: Option<StopTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

impl RunReport {
    /// Outcome of a named action.
    pub fn action(&self, name: &str) -> Option<&ActionOutcome> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// State of a named action.
    pub fn action_state(&self, name: &str) -> Option<ActionState> {
        self.action(name).map(|a| a.state)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Mutable state of a run in progress.
///
/// Owned by the executor's scheduling loop; handlers never touch it.
#[derive(Debug)]
pub struct ExperimentRun {
    pub(crate) run_id: Uuid,
    pub(crate) state: RunState,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) actions: HashMap<String, ActionState>,
    outcomes: HashMap<String, ActionOutcome>,
    pub(crate) resolved_targets: BTreeMap<String, Vec<String>>,
    pub(crate) stop_trigger: Option<StopTrigger>,
    pub(crate) failure: Option<FailureCause>,
}

impl ExperimentRun {
    pub(crate) fn new(template: &ExperimentTemplate) -> Self {
        let actions = template
            .actions
            .keys()
            .map(|name| (name.clone(), ActionState::Pending))
            .collect();
        let outcomes = template
            .actions
            .iter()
            .map(|(name, action)| {
                (
                    name.clone(),
                    ActionOutcome {
                        name: name.clone(),
                        action_id: action.action_id.clone(),
                        state: ActionState::Pending,
                        started_at: None,
                        ended_at: None,
                        error: None,
                        skip_reason: None,
                    },
                )
            })
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Pending,
            started_at: Utc::now(),
            actions,
            outcomes,
            resolved_targets: BTreeMap::new(),
            stop_trigger: None,
            failure: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn action_state(&self, name: &str) -> Option<ActionState> {
        self.actions.get(name).copied()
    }

    pub(crate) fn mark_running(&mut self, name: &str) {
        self.set(name, ActionState::Running);
        if let Some(o) = self.outcomes.get_mut(name) {
            o.started_at = Some(Utc::now());
        }
    }

    pub(crate) fn mark_completed(&mut self, name: &str) {
        self.set(name, ActionState::Completed);
        self.stamp_end(name);
    }

    pub(crate) fn mark_failed(&mut self, name: &str, error: String) {
        self.set(name, ActionState::Failed);
        self.stamp_end(name);
        if let Some(o) = self.outcomes.get_mut(name) {
            o.error = Some(error);
        }
    }

    pub(crate) fn mark_skipped(&mut self, name: &str, reason: SkipReason) {
        self.set(name, ActionState::Skipped);
        if let Some(o) = self.outcomes.get_mut(name) {
            o.skip_reason = Some(reason);
        }
    }

    pub(crate) fn mark_blocked(&mut self, name: &str) {
        self.set(name, ActionState::Blocked);
    }

    /// Names currently in `state`, sorted.
    pub(crate) fn actions_in(&self, state: ActionState) -> Vec<String> {
        let mut names: Vec<String> = self
            .actions
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Freeze the run into a report, ordering outcomes by `order`.
    pub(crate) fn into_report(mut self, description: &str, order: &[&str]) -> RunReport {
        let actions = order
            .iter()
            .filter_map(|name| self.outcomes.remove(*name))
            .collect();
        RunReport {
            run_id: self.run_id,
            description: description.to_string(),
            state: self.state,
            started_at: self.started_at,
            ended_at: Utc::now(),
            actions,
            resolved_targets: self.resolved_targets,
            stop_trigger: self.stop_trigger,
            failure: self.failure,
        }
    }

    fn set(&mut self, name: &str, state: ActionState) {
        if let Some(s) = self.actions.get_mut(name) {
            *s = state;
        }
        if let Some(o) = self.outcomes.get_mut(name) {
            o.state = state;
        }
    }

    fn stamp_end(&mut self, name: &str) {
        if let Some(o) = self.outcomes.get_mut(name) {
            o.ended_at = Some(Utc::now());
        }
    }
}
