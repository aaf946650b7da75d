//! Static template validation.
//!
//! [`Validator::validate`] runs every check and collects every problem before
//! returning, so an author can fix a template in one pass. A template that
//! passes is wrapped in [`ValidatedTemplate`] together with its action graph;
//! the executor only accepts the wrapped form.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{GraphError, ValidationError, ValidationErrors};
use crate::graph::{ActionGraph, cycles};
use crate::registry::ActionRegistry;
use crate::template::{ExperimentTemplate, STOP_CONDITION_NONE};

/// A template that passed validation, with its dependency graph.
#[derive(Debug, Clone)]
pub struct ValidatedTemplate {
    template: ExperimentTemplate,
    graph: ActionGraph,
}

impl ValidatedTemplate {
    pub fn template(&self) -> &ExperimentTemplate {
        &self.template
    }

    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    pub fn into_template(self) -> ExperimentTemplate {
        self.template
    }
}

/// Checks templates against an action registry.
pub struct Validator<'a> {
    registry: &'a ActionRegistry,
    alarm_sources: Option<BTreeSet<String>>,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a ActionRegistry) -> Self {
        Self {
            registry,
            alarm_sources: None,
        }
    }

    /// Restrict stop-condition sources to `sources` (plus `none`).
    ///
    /// Without this, any source id is accepted and an unknown one is only
    /// reported by the monitor at run time.
    pub fn with_alarm_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alarm_sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    /// Validate `template`, returning all problems found.
    pub fn validate(
        &self,
        template: &ExperimentTemplate,
    ) -> Result<ValidatedTemplate, ValidationErrors> {
        let mut errors = Vec::new();

        if template.actions.is_empty() {
            errors.push(ValidationError::NoActions);
        }
        self.check_predecessors(template, &mut errors);
        self.check_actions(template, &mut errors);
        self.check_targets(template, &mut errors);
        self.check_stop_conditions(template, &mut errors);

        if !errors.is_empty() {
            debug!(errors = errors.len(), "Template failed validation");
            return Err(ValidationErrors(errors));
        }

        let graph = ActionGraph::build(template).map_err(|e| {
            ValidationErrors(vec![match e {
                GraphError::UnknownPredecessor {
                    action,
                    predecessor,
                } => ValidationError::UnknownPredecessor {
                    action,
                    predecessor,
                },
                GraphError::Cycle { members } => ValidationError::Cycle { members },
            }])
        })?;

        Ok(ValidatedTemplate {
            template: template.clone(),
            graph,
        })
    }

    /// Dangling `startAfter` entries, then one `Cycle` per strongly connected
    /// component among the known edges.
    fn check_predecessors(&self, template: &ExperimentTemplate, errors: &mut Vec<ValidationError>) {
        let index: HashMap<&str, usize> = template
            .actions
            .keys()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut successors: Vec<Vec<usize>> = vec![vec![]; template.actions.len()];

        for (idx, (name, action)) in template.actions.iter().enumerate() {
            for pred in &action.start_after {
                match index.get(pred.as_str()) {
                    Some(&p) => {
                        if !successors[p].contains(&idx) {
                            successors[p].push(idx);
                        }
                    }
                    None => errors.push(ValidationError::UnknownPredecessor {
                        action: name.clone(),
                        predecessor: pred.clone(),
                    }),
                }
            }
        }

        let names: Vec<&String> = template.actions.keys().collect();
        for component in cycles(&successors) {
            errors.push(ValidationError::Cycle {
                members: component.into_iter().map(|i| names[i].clone()).collect(),
            });
        }
    }

    fn check_actions(&self, template: &ExperimentTemplate, errors: &mut Vec<ValidationError>) {
        for (name, action) in &template.actions {
            for (role, target) in &action.targets {
                if !template.targets.contains_key(target) {
                    errors.push(ValidationError::UnknownTarget {
                        action: name.clone(),
                        role: role.clone(),
                        target: target.clone(),
                    });
                }
            }

            let Some(kind) = self.registry.lookup(&action.action_id) else {
                errors.push(ValidationError::UnknownActionKind {
                    action: name.clone(),
                    action_id: action.action_id.clone(),
                });
                continue;
            };

            for param in &kind.required_params {
                if !action.parameters.contains_key(param) {
                    errors.push(ValidationError::MissingParameter {
                        action: name.clone(),
                        action_id: action.action_id.clone(),
                        parameter: param.clone(),
                    });
                }
            }
            for (param, check) in &kind.param_checks {
                if let Some(value) = action.parameters.get(param)
                    && let Err(reason) = check(value.as_str())
                {
                    errors.push(ValidationError::InvalidParameter {
                        action: name.clone(),
                        parameter: param.clone(),
                        reason,
                    });
                }
            }
            for role in &kind.required_targets {
                if !action.targets.contains_key(role) {
                    errors.push(ValidationError::MissingTargetRole {
                        action: name.clone(),
                        action_id: action.action_id.clone(),
                        role: role.clone(),
                    });
                }
            }
        }
    }

    fn check_targets(&self, template: &ExperimentTemplate, errors: &mut Vec<ValidationError>) {
        for (name, spec) in &template.targets {
            let reason = match spec.selection() {
                Ok(mode) if mode.is_zero() => Some(format!("{mode} can never select a resource")),
                Ok(_) => None,
                Err(reason) => Some(reason),
            };
            if let Some(reason) = reason {
                errors.push(ValidationError::InvalidSelectionMode {
                    target: name.clone(),
                    value: spec.selection_mode.clone(),
                    reason,
                });
            }
        }
    }

    fn check_stop_conditions(&self, template: &ExperimentTemplate, errors: &mut Vec<ValidationError>) {
        for (index, condition) in template.stop_conditions.iter().enumerate() {
            if condition.source == STOP_CONDITION_NONE {
                continue;
            }
            if let Some(known) = &self.alarm_sources
                && !known.contains(&condition.source)
            {
                errors.push(ValidationError::UnknownStopConditionSource {
                    index,
                    source_id: condition.source.clone(),
                });
            }
            if condition.value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                errors.push(ValidationError::MissingStopConditionValue {
                    index,
                    source_id: condition.source.clone(),
                });
            }
        }
    }
}
