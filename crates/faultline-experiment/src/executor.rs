//! Experiment executor.
//!
//! Drives one run of a validated template:
//!
//! 1. resolve every target referenced by an action (before any handler runs)
//! 2. start the stop-condition monitor
//! 3. repeatedly dispatch the ready set to the action handlers, bounded by
//!    `max_concurrent_actions`, and record each completion
//! 4. stop dispatching as soon as a stop condition triggers or the operator
//!    cancels; in-flight actions finish, undispatched ones end `Blocked`
//!
//! Handlers are only told about a stop when `interrupt_in_flight` is set.
//!
//! Run state is owned by the scheduling loop. Handlers run as tasks in a
//! `JoinSet` and report back through their join result; they never touch the
//! run directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alarm::AlarmState;
use crate::error::{ExperimentError, Result};
use crate::graph::ActionGraph;
use crate::monitor::{AlarmSources, StopConditionMonitor};
use crate::registry::{ActionContext, ActionFailure, ActionHandler, ActionRegistry};
use crate::run::{ActionState, ExperimentRun, FailureCause, RunReport, RunState, SkipReason, StopTrigger};
use crate::target::{ResourceInventory, TargetResolution, TargetResolver};
use crate::template::ExperimentTemplate;
use crate::validate::ValidatedTemplate;

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on handlers running at once.
    pub max_concurrent_actions: usize,
    /// A handler still running after this long is failed.
    pub action_timeout: Duration,
    /// Background stop-condition poll interval.
    pub poll_interval: Duration,
    /// Alarm states that trigger a stop condition.
    pub triggering_states: Vec<AlarmState>,
    /// Cancel the token handed to running handlers when the run stops.
    /// Off by default: in-flight actions run to completion.
    pub interrupt_in_flight: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: 8,
            action_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
            triggering_states: vec![AlarmState::Alarm],
            interrupt_in_flight: false,
        }
    }
}

type ActionResult = (String, std::result::Result<(), ActionFailure>);

/// Runs validated experiment templates.
pub struct ExperimentExecutor {
    registry: Arc<ActionRegistry>,
    resolver: TargetResolver,
    alarm_sources: AlarmSources,
    config: ExecutorConfig,
}

impl ExperimentExecutor {
    pub fn new(
        registry: Arc<ActionRegistry>,
        inventory: Arc<dyn ResourceInventory>,
        alarm_sources: AlarmSources,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            resolver: TargetResolver::new(inventory),
            alarm_sources,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `validated` to a terminal state.
    ///
    /// Cancelling `cancel` aborts the run the same way a triggered stop
    /// condition does. Run-level failures (empty targets, failed actions) are
    /// reported in the returned [`RunReport`]; `Err` means the run could not
    /// start because a handler is missing from the registry.
    pub async fn run(
        &self,
        validated: &ValidatedTemplate,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let template = validated.template();
        let graph = validated.graph();
        let order = graph.topological_order();

        let handlers = self.handlers(template)?;
        let mut run = ExperimentRun::new(template);
        run.state = RunState::Running;
        let run_id = run.run_id();
        info!(
            %run_id,
            actions = graph.len(),
            description = %template.description,
            "Experiment run started"
        );

        if let Err(cause) = self.resolve_targets(template, &mut run).await {
            warn!(%run_id, ?cause, "Target resolution failed; no action dispatched");
            for name in &order {
                run.mark_blocked(name);
            }
            run.failure = Some(cause);
            run.state = RunState::Failed;
            return Ok(run.into_report(&template.description, &order));
        }
        skip_empty_targets(template, &order, &mut run);

        let monitor = Arc::new(StopConditionMonitor::new(
            &template.stop_conditions,
            &self.alarm_sources,
            self.config.triggering_states.clone(),
        ));
        let monitor_shutdown = CancellationToken::new();
        let monitor_task = monitor.spawn(self.config.poll_interval, monitor_shutdown.clone());

        let (stop, mut failed, mut upstream_skipped) = {
            let mut scheduler = Scheduler {
                template,
                graph,
                handlers: &handlers,
                config: &self.config,
                run: &mut run,
                tasks: JoinSet::new(),
                handler_cancel: CancellationToken::new(),
                stop: None,
                failed: Vec::new(),
                upstream_skipped: Vec::new(),
                stop_logged: false,
            };
            scheduler.stop = monitor.poll_once().await;
            scheduler.drive(&monitor, &cancel).await;
            (scheduler.stop, scheduler.failed, scheduler.upstream_skipped)
        };

        monitor_shutdown.cancel();
        if let Err(e) = monitor_task.await {
            warn!(%run_id, "Stop-condition monitor task ended abnormally: {e}");
        }

        for name in run.actions_in(ActionState::Pending) {
            run.mark_blocked(&name);
        }

        if let Some(trigger) = stop {
            run.state = RunState::StoppedByCondition;
            run.stop_trigger = Some(trigger);
        } else if !failed.is_empty() {
            failed.sort();
            upstream_skipped.sort();
            run.state = RunState::Failed;
            run.failure = Some(FailureCause::ActionsFailed {
                failed,
                skipped: upstream_skipped,
            });
        } else {
            run.state = RunState::Completed;
        }

        info!(%run_id, state = ?run.state, "Experiment run finished");
        Ok(run.into_report(&template.description, &order))
    }

    /// Look up every action's handler before anything runs.
    fn handlers(
        &self,
        template: &ExperimentTemplate,
    ) -> Result<HashMap<String, Arc<dyn ActionHandler>>> {
        template
            .actions
            .iter()
            .map(|(name, action)| {
                self.registry
                    .lookup(&action.action_id)
                    .map(|kind| (name.clone(), Arc::clone(&kind.handler)))
                    .ok_or_else(|| ExperimentError::UnknownActionKind(action.action_id.clone()))
            })
            .collect()
    }

    /// Resolve each referenced target once, in declaration order.
    async fn resolve_targets(
        &self,
        template: &ExperimentTemplate,
        run: &mut ExperimentRun,
    ) -> std::result::Result<(), FailureCause> {
        let policy = template.experiment_options.empty_target_resolution_mode;

        for (name, spec) in &template.targets {
            let dependents = template.actions_using_target(name);
            if dependents.is_empty() {
                debug!(target_name = %name, "Target not referenced by any action; not resolved");
                continue;
            }

            let ids = match self
                .resolver
                .resolve_with_policy(name, spec, policy, &dependents)
                .await
            {
                Ok(TargetResolution::Resolved(ids)) => ids,
                Ok(TargetResolution::Empty) => Vec::new(),
                Err(ExperimentError::EmptyTarget { target, actions }) => {
                    return Err(FailureCause::EmptyTarget { target, actions });
                }
                Err(ExperimentError::Inventory { target, message }) => {
                    return Err(FailureCause::TargetResolution { target, message });
                }
                Err(other) => {
                    return Err(FailureCause::TargetResolution {
                        target: name.clone(),
                        message: other.to_string(),
                    });
                }
            };
            run.resolved_targets.insert(name.clone(), ids);
        }
        Ok(())
    }
}

/// Mark actions whose every target binding resolved empty as skipped.
fn skip_empty_targets(template: &ExperimentTemplate, order: &[&str], run: &mut ExperimentRun) {
    for name in order {
        let Some(action) = template.actions.get(*name) else {
            continue;
        };
        if action.targets.is_empty() {
            continue;
        }
        let all_empty = action
            .targets
            .values()
            .all(|t| run.resolved_targets.get(t).is_none_or(Vec::is_empty));
        if all_empty {
            let mut targets: Vec<String> = action.targets.values().cloned().collect();
            targets.sort();
            targets.dedup();
            info!(action = %name, ?targets, "Skipping action: all targets empty");
            run.mark_skipped(name, SkipReason::EmptyTarget { targets });
        }
    }
}

/// State of the scheduling loop for one run.
struct Scheduler<'a> {
    template: &'a ExperimentTemplate,
    graph: &'a ActionGraph,
    handlers: &'a HashMap<String, Arc<dyn ActionHandler>>,
    config: &'a ExecutorConfig,
    run: &'a mut ExperimentRun,
    tasks: JoinSet<ActionResult>,
    /// Handed to every handler; cancelled on stop only with `interrupt_in_flight`.
    handler_cancel: CancellationToken,
    stop: Option<StopTrigger>,
    stop_logged: bool,
    failed: Vec<String>,
    upstream_skipped: Vec<String>,
}

impl Scheduler<'_> {
    async fn drive(&mut self, monitor: &StopConditionMonitor, cancel: &CancellationToken) {
        let mut abort = monitor.subscribe();
        let max = self.config.max_concurrent_actions.max(1);

        loop {
            if self.stop.is_none() {
                if cancel.is_cancelled() {
                    self.stop = Some(StopTrigger::Operator);
                } else {
                    self.stop = monitor.tripped();
                }
            }
            if let Some(trigger) = &self.stop
                && !self.stop_logged
            {
                self.stop_logged = true;
                info!(
                    run_id = %self.run.run_id(),
                    ?trigger,
                    in_flight = self.tasks.len(),
                    "Run stopped; no further dispatch"
                );
                if self.config.interrupt_in_flight {
                    self.handler_cancel.cancel();
                }
            }

            if self.stop.is_none() {
                let ready: Vec<String> = self
                    .graph
                    .ready_set(&self.run.actions)
                    .into_iter()
                    .map(String::from)
                    .collect();
                for name in ready {
                    if self.tasks.len() >= max {
                        debug!(max, "Concurrency limit reached; deferring dispatch");
                        break;
                    }
                    self.dispatch(&name);
                }
            }

            if self.tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = self.tasks.join_next() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((name, result)) => self.complete(&name, result),
                        Err(e) => error!("Action task failed to join: {e}"),
                    }
                    if self.stop.is_none() {
                        self.stop = monitor.poll_once().await;
                    }
                }
                _ = cancel.cancelled(), if self.stop.is_none() => {
                    self.stop = Some(StopTrigger::Operator);
                }
                changed = abort.changed(), if self.stop.is_none() => {
                    if changed.is_ok() {
                        self.stop = abort.borrow().clone();
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, name: &str) {
        let (Some(action), Some(handler)) =
            (self.template.actions.get(name), self.handlers.get(name))
        else {
            return;
        };

        let targets: BTreeMap<String, Vec<String>> = action
            .targets
            .iter()
            .filter_map(|(role, target)| {
                self.run
                    .resolved_targets
                    .get(target)
                    .filter(|ids| !ids.is_empty())
                    .map(|ids| (role.clone(), ids.clone()))
            })
            .collect();

        let ctx = ActionContext {
            action_name: name.to_string(),
            action_id: action.action_id.clone(),
            parameters: action.parameters.clone(),
            targets,
            cancel: self.handler_cancel.clone(),
        };

        info!(action = %name, action_id = %action.action_id, "Dispatching action");
        self.run.mark_running(name);

        let handler = Arc::clone(handler);
        let timeout = self.config.action_timeout;
        let name = name.to_string();
        self.tasks.spawn(async move {
            // Inner task so a panicking handler still reports under its name
            let inner = tokio::spawn(async move {
                tokio::time::timeout(timeout, handler.execute(ctx)).await
            });
            let result = match inner.await {
                Ok(Ok(result)) => result,
                Ok(Err(_elapsed)) => Err(ActionFailure(format!("timed out after {timeout:?}"))),
                Err(e) if e.is_panic() => Err(ActionFailure::new("handler panicked")),
                Err(e) => Err(ActionFailure(format!("handler task cancelled: {e}"))),
            };
            (name, result)
        });
    }

    fn complete(&mut self, name: &str, result: std::result::Result<(), ActionFailure>) {
        match result {
            Ok(()) => {
                info!(action = %name, "Action completed");
                self.run.mark_completed(name);
            }
            Err(failure) => {
                let err = ExperimentError::ActionFailed {
                    action: name.to_string(),
                    reason: failure.0.clone(),
                };
                warn!("{err}");
                self.run.mark_failed(name, failure.0);
                self.failed.push(name.to_string());

                if self.stop.is_some() {
                    return;
                }
                for descendant in self.graph.descendants(name) {
                    if self.run.action_state(descendant) == Some(ActionState::Pending) {
                        debug!(action = %descendant, upstream = %name, "Skipping action: upstream failed");
                        self.run.mark_skipped(
                            descendant,
                            SkipReason::UpstreamFailed {
                                action: name.to_string(),
                            },
                        );
                        self.upstream_skipped.push(descendant.to_string());
                    }
                }
            }
        }
    }
}
