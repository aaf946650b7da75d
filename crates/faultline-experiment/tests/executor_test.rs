//! End-to-end executor tests against in-memory inventory and alarms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use faultline_experiment::{
    ActionContext, ActionFailure, ActionHandler, ActionKind, ActionRegistry, ActionState,
    AlarmSources, AlarmState, ExecutorConfig, ExperimentExecutor, ExperimentTemplate,
    FailureCause, InMemoryAlarms, InMemoryInventory, ResourceRecord, RunState, SkipReason,
    StopTrigger, ValidatedTemplate, Validator, builtin,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const FIRE: &str = "arn:aws:cloudwatch:eu-west-1:123456789012:alarm:Everythings on fire";
const AVAILABILITY: &str =
    "arn:aws:cloudwatch:eu-west-1:123456789012:alarm:Demo API low availability";

fn stop_tasks_template(empty_mode: &str) -> ExperimentTemplate {
    let json = format!(
        r#"{{
  "description": "If 50% of tasks are stopped then availability will not be impacted",
  "actions": {{
    "stop-tasks": {{
      "actionId": "aws:ecs:stop-task",
      "targets": {{ "Tasks": "ecs-tasks" }}
    }},
    "wait": {{
      "actionId": "aws:fis:wait",
      "parameters": {{ "duration": "PT20M" }},
      "startAfter": ["stop-tasks"]
    }},
    "check-availability": {{
      "actionId": "aws:cloudwatch:assert-alarm-state",
      "parameters": {{
        "alarmArns": "{AVAILABILITY}",
        "alarmStates": "OK,INSUFFICIENT_DATA"
      }},
      "startAfter": ["stop-tasks", "wait"]
    }}
  }},
  "targets": {{
    "ecs-tasks": {{
      "resourceType": "aws:ecs:task",
      "resourceTags": {{
        "aws:ecs:clusterName": "test-fargate",
        "aws:ecs:serviceName": "fis-demoapi"
      }},
      "filters": [{{ "path": "LastStatus", "values": ["RUNNING"] }}],
      "selectionMode": "PERCENT(50)"
    }}
  }},
  "stopConditions": [{{ "source": "aws:cloudwatch:alarm", "value": "{FIRE}" }}],
  "experimentOptions": {{
    "accountTargeting": "single-account",
    "emptyTargetResolutionMode": "{empty_mode}"
  }}
}}"#
    );
    ExperimentTemplate::from_json(&json).unwrap()
}

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    RaiseAlarm,
    Fail,
}

/// Stands in for the ECS stop-task fault.
struct StopTasks {
    behaviour: Behaviour,
    alarms: Arc<InMemoryAlarms>,
    calls: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl ActionHandler for StopTasks {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionFailure> {
        self.calls.lock().unwrap().push(ctx.target("Tasks").to_vec());
        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::RaiseAlarm => {
                self.alarms.set(FIRE, AlarmState::Alarm);
                Ok(())
            }
            Behaviour::Fail => Err(ActionFailure::new("ecs:StopTask access denied")),
        }
    }
}

struct Harness {
    alarms: Arc<InMemoryAlarms>,
    inventory: Arc<InMemoryInventory>,
    stop_tasks: Arc<StopTasks>,
    registry: Arc<ActionRegistry>,
}

impl Harness {
    fn new(behaviour: Behaviour) -> Self {
        let alarms = Arc::new(InMemoryAlarms::new());
        alarms.set(FIRE, AlarmState::Ok);
        alarms.set(AVAILABILITY, AlarmState::Ok);

        let inventory = Arc::new(InMemoryInventory::new());
        for (id, status) in [
            ("task-3", "RUNNING"),
            ("task-1", "RUNNING"),
            ("task-4", "RUNNING"),
            ("task-2", "RUNNING"),
            ("task-0", "STOPPED"),
        ] {
            inventory.add(
                "aws:ecs:task",
                ResourceRecord::new(id)
                    .with_tag("aws:ecs:clusterName", "test-fargate")
                    .with_tag("aws:ecs:serviceName", "fis-demoapi")
                    .with_attribute("LastStatus", json!(status)),
            );
        }

        let stop_tasks = Arc::new(StopTasks {
            behaviour,
            alarms: alarms.clone(),
            calls: Mutex::new(Vec::new()),
        });

        let mut registry = ActionRegistry::new();
        builtin::register(&mut registry, alarms.clone());
        registry.register(
            "aws:ecs:stop-task",
            ActionKind::new(stop_tasks.clone()).with_target("Tasks"),
        );

        Self {
            alarms,
            inventory,
            stop_tasks,
            registry: Arc::new(registry),
        }
    }

    fn validate(&self, template: &ExperimentTemplate) -> ValidatedTemplate {
        Validator::new(&self.registry)
            .with_alarm_sources(["aws:cloudwatch:alarm"])
            .validate(template)
            .unwrap()
    }

    fn executor(&self, config: ExecutorConfig) -> ExperimentExecutor {
        let mut sources = AlarmSources::new();
        sources.insert("aws:cloudwatch:alarm".into(), self.alarms.clone());
        ExperimentExecutor::new(
            self.registry.clone(),
            self.inventory.clone(),
            sources,
            config,
        )
    }

    fn stop_task_calls(&self) -> Vec<Vec<String>> {
        self.stop_tasks.calls.lock().unwrap().clone()
    }
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        poll_interval: Duration::from_secs(30),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_linear_chain_completes() {
    let h = Harness::new(Behaviour::Succeed);
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    for name in ["stop-tasks", "wait", "check-availability"] {
        assert_eq!(report.action_state(name), Some(ActionState::Completed), "{name}");
    }
    let names: Vec<&str> = report.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["stop-tasks", "wait", "check-availability"]);
    assert!(report.stop_trigger.is_none());
    assert!(report.failure.is_none());

    // PERCENT(50) of the four running tasks, lowest ids first
    assert_eq!(h.stop_task_calls(), vec![vec!["task-1".to_string(), "task-2".to_string()]]);
    assert_eq!(report.resolved_targets["ecs-tasks"], vec!["task-1", "task-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_alarm_after_first_action_stops_run() {
    let h = Harness::new(Behaviour::RaiseAlarm);
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::StoppedByCondition);
    assert_eq!(report.action_state("stop-tasks"), Some(ActionState::Completed));
    assert_eq!(report.action_state("wait"), Some(ActionState::Blocked));
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Blocked));
    assert!(report.action("wait").unwrap().started_at.is_none());

    match report.stop_trigger {
        Some(StopTrigger::StopCondition {
            index,
            ref source,
            ref alarm,
            ref state,
        }) => {
            assert_eq!(index, 0);
            assert_eq!(source, "aws:cloudwatch:alarm");
            assert_eq!(alarm, FIRE);
            assert_eq!(*state, AlarmState::Alarm);
        }
        ref other => panic!("Expected stop-condition trigger, got: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_alarm_already_firing_blocks_first_dispatch() {
    let h = Harness::new(Behaviour::Succeed);
    h.alarms.set(FIRE, AlarmState::Alarm);
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::StoppedByCondition);
    assert!(h.stop_task_calls().is_empty());
    assert!(report.actions.iter().all(|a| a.state == ActionState::Blocked));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_empty_target_fails_before_any_handler() {
    let h = Harness::new(Behaviour::Succeed);
    h.inventory.clear();
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(
        report.failure,
        Some(FailureCause::EmptyTarget {
            target: "ecs-tasks".into(),
            actions: vec!["stop-tasks".into()],
        })
    );
    assert!(h.stop_task_calls().is_empty());
    assert!(report.actions.iter().all(|a| a.started_at.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_empty_target_skip_mode_lets_successors_run() {
    let h = Harness::new(Behaviour::Succeed);
    h.inventory.clear();
    let validated = h.validate(&stop_tasks_template("skip"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.action_state("stop-tasks"), Some(ActionState::Skipped));
    assert_eq!(
        report.action("stop-tasks").unwrap().skip_reason,
        Some(SkipReason::EmptyTarget {
            targets: vec!["ecs-tasks".into()],
        })
    );
    assert_eq!(report.action_state("wait"), Some(ActionState::Completed));
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Completed));
    assert!(h.stop_task_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_action_skips_successors_and_fails_run() {
    let h = Harness::new(Behaviour::Fail);
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.action_state("stop-tasks"), Some(ActionState::Failed));
    assert_eq!(
        report.action("stop-tasks").unwrap().error.as_deref(),
        Some("ecs:StopTask access denied")
    );
    for name in ["wait", "check-availability"] {
        let outcome = report.action(name).unwrap();
        assert_eq!(outcome.state, ActionState::Skipped, "{name}");
        assert_eq!(
            outcome.skip_reason,
            Some(SkipReason::UpstreamFailed {
                action: "stop-tasks".into(),
            })
        );
    }
    assert_eq!(
        report.failure,
        Some(FailureCause::ActionsFailed {
            failed: vec!["stop-tasks".into()],
            skipped: vec!["check-availability".into(), "wait".into()],
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_stop_independent_branch() {
    let h = Harness::new(Behaviour::Fail);
    let mut template = stop_tasks_template("fail");
    let mut side = template.actions["wait"].clone();
    side.start_after.clear();
    side.parameters.insert("duration".into(), "PT1M".into());
    template.actions.insert("side-wait".into(), side);
    let validated = h.validate(&template);

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.action_state("side-wait"), Some(ActionState::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_operator_cancel_lets_in_flight_wait_finish() {
    let h = Harness::new(Behaviour::Succeed);
    let validated = h.validate(&stop_tasks_template("fail"));
    let executor = h.executor(config());
    let cancel = CancellationToken::new();
    let started = tokio::time::Instant::now();

    let (report, ()) = tokio::join!(executor.run(&validated, cancel.clone()), async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();
    });
    let report = report.unwrap();

    assert_eq!(report.state, RunState::StoppedByCondition);
    assert_eq!(report.stop_trigger, Some(StopTrigger::Operator));
    assert_eq!(report.action_state("stop-tasks"), Some(ActionState::Completed));
    let wait = report.action("wait").unwrap();
    assert_eq!(wait.state, ActionState::Completed);
    assert!(wait.error.is_none());
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Blocked));
    // The run waited out the full PT20M
    assert!(started.elapsed() >= Duration::from_secs(1200));
}

#[tokio::test(start_paused = true)]
async fn test_stop_condition_lets_in_flight_wait_finish() {
    let h = Harness::new(Behaviour::Succeed);
    let validated = h.validate(&stop_tasks_template("fail"));
    let executor = h.executor(config());
    let alarms = h.alarms.clone();

    let (report, ()) = tokio::join!(executor.run(&validated, CancellationToken::new()), async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        alarms.set(FIRE, AlarmState::Alarm);
    });
    let report = report.unwrap();

    assert_eq!(report.state, RunState::StoppedByCondition);
    assert!(matches!(report.stop_trigger, Some(StopTrigger::StopCondition { .. })));
    assert_eq!(report.action_state("wait"), Some(ActionState::Completed));
    assert!(report.action("wait").unwrap().error.is_none());
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Blocked));
    assert!(report.failure.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_in_flight_cancels_running_wait() {
    let h = Harness::new(Behaviour::Succeed);
    let validated = h.validate(&stop_tasks_template("fail"));
    let executor = h.executor(ExecutorConfig {
        interrupt_in_flight: true,
        ..config()
    });
    let alarms = h.alarms.clone();

    let (report, ()) = tokio::join!(executor.run(&validated, CancellationToken::new()), async {
        tokio::time::sleep(Duration::from_secs(120)).await;
        alarms.set(FIRE, AlarmState::Alarm);
    });
    let report = report.unwrap();

    assert_eq!(report.state, RunState::StoppedByCondition);
    let wait = report.action("wait").unwrap();
    assert_eq!(wait.state, ActionState::Failed);
    assert_eq!(wait.error.as_deref(), Some("wait interrupted"));
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Blocked));
}

#[tokio::test(start_paused = true)]
async fn test_zero_poll_interval_still_polls_in_background() {
    let h = Harness::new(Behaviour::Succeed);
    let validated = h.validate(&stop_tasks_template("fail"));
    let executor = h.executor(ExecutorConfig {
        poll_interval: Duration::ZERO,
        interrupt_in_flight: true,
        ..Default::default()
    });
    let alarms = h.alarms.clone();
    let started = tokio::time::Instant::now();

    let (report, ()) = tokio::join!(executor.run(&validated, CancellationToken::new()), async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        alarms.set(FIRE, AlarmState::Alarm);
    });
    let report = report.unwrap();

    // The background poll caught the alarm long before the wait would have ended
    assert_eq!(report.state, RunState::StoppedByCondition);
    assert_eq!(report.action_state("wait"), Some(ActionState::Failed));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_availability_assertion_failure_fails_action_not_monitor() {
    let h = Harness::new(Behaviour::Succeed);
    h.alarms.set(AVAILABILITY, AlarmState::Alarm);
    let validated = h.validate(&stop_tasks_template("fail"));

    let report = h
        .executor(config())
        .run(&validated, CancellationToken::new())
        .await
        .unwrap();

    // The assertion alarm is not a stop condition
    assert_eq!(report.state, RunState::Failed);
    assert!(report.stop_trigger.is_none());
    assert_eq!(report.action_state("check-availability"), Some(ActionState::Failed));
}

/// Sleeps for a second while tracking how many instances run at once.
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ActionHandler for Gauge {
    async fn execute(&self, _ctx: ActionContext) -> Result<(), ActionFailure> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn run_parallel(actions: usize, limit: usize) -> usize {
    let gauge = Arc::new(Gauge {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut registry = ActionRegistry::new();
    registry.register("test:gauge", ActionKind::new(gauge.clone()));

    let mut template = ExperimentTemplate::default();
    for i in 0..actions {
        template.actions.insert(
            format!("a{i}"),
            faultline_experiment::Action {
                action_id: "test:gauge".into(),
                ..Default::default()
            },
        );
    }
    let validated = Validator::new(&registry).validate(&template).unwrap();

    let executor = ExperimentExecutor::new(
        Arc::new(registry),
        Arc::new(InMemoryInventory::new()),
        AlarmSources::new(),
        ExecutorConfig {
            max_concurrent_actions: limit,
            ..Default::default()
        },
    );
    let report = executor.run(&validated, CancellationToken::new()).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    gauge.peak.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn test_independent_actions_run_in_parallel() {
    assert_eq!(run_parallel(3, 8).await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    assert_eq!(run_parallel(5, 2).await, 2);
}
