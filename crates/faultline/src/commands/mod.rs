//! CLI command handlers.

pub mod config;
pub mod plan;
pub mod render;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use faultline_config::{EnvironmentConfig, FaultlineConfig, LoadedConfig};
use faultline_experiment::{
    ActionContext, ActionFailure, ActionHandler, ActionKind, ActionRegistry, AlarmState,
    ExecutorConfig, InMemoryAlarms, RenderVars, TemplateFormat, Validator, builtin,
    parse_iso8601_duration,
};

/// Stop-condition source the CLI knows how to monitor.
pub const ALARM_SOURCE: &str = "aws:cloudwatch:alarm";

pub const ECS_STOP_TASK: &str = "aws:ecs:stop-task";
pub const ECS_TASK_CPU_STRESS: &str = "aws:ecs:task-cpu-stress";

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Explicit user config directory, if given.
    pub config_dir: Option<PathBuf>,
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
}

impl Context {
    pub fn config(&self) -> &FaultlineConfig {
        &self.loaded.config
    }
}

/// Registry of every action kind the CLI can check.
///
/// The fault kinds have no executor here; validation only needs their schema.
pub fn schema_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    builtin::register(&mut registry, Arc::new(InMemoryAlarms::new()));
    registry.register(
        ECS_STOP_TASK,
        ActionKind::new(Arc::new(SchemaOnly)).with_target("Tasks"),
    );
    registry.register(
        ECS_TASK_CPU_STRESS,
        ActionKind::new(Arc::new(SchemaOnly))
            .with_target("Tasks")
            .with_param_check("duration", check_duration),
    );
    registry
}

pub fn validator(registry: &ActionRegistry) -> Validator<'_> {
    Validator::new(registry).with_alarm_sources([ALARM_SOURCE])
}

fn check_duration(value: &str) -> std::result::Result<(), String> {
    parse_iso8601_duration(value).map(|_| ())
}

/// Executor settings from `[executor]` and `[monitor]`.
pub fn executor_config(config: &FaultlineConfig) -> ExecutorConfig {
    let executor = config.executor();
    let monitor = config.monitor();
    ExecutorConfig {
        max_concurrent_actions: executor.max_concurrent_actions,
        action_timeout: executor.action_timeout(),
        poll_interval: monitor.poll_interval(),
        triggering_states: monitor
            .triggering_states
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| AlarmState::from(s.to_string()))
            .collect(),
        interrupt_in_flight: executor.interrupt_in_flight,
    }
}

/// Render variables from `[environment]`.
pub fn render_vars(env: &EnvironmentConfig) -> RenderVars {
    let mut vars = RenderVars::new().partition(env.partition.as_str());
    if let Some(account) = &env.account {
        vars = vars.account(account.as_str());
    }
    if let Some(region) = &env.region {
        vars = vars.region(region.as_str());
    }
    for (name, value) in &env.vars {
        vars = vars.var(name.as_str(), value.as_str());
    }
    vars
}

/// Expand directories into their template files (sorted, non-recursive).
pub fn collect_template_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(path)?
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && TemplateFormat::from_path(p).is_some())
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(anyhow!("No such file or directory: {}", path.display()));
        }
    }
    Ok(files)
}

/// Template directory from `[templates]`, relative to the working directory.
pub fn templates_dir(config: &FaultlineConfig) -> Option<&Path> {
    config.templates.as_ref()?.dir.as_deref()
}

/// Handler for kinds the CLI only validates.
struct SchemaOnly;

#[async_trait]
impl ActionHandler for SchemaOnly {
    async fn execute(&self, ctx: ActionContext) -> std::result::Result<(), ActionFailure> {
        Err(ActionFailure::new(format!(
            "{} cannot be executed from the CLI",
            ctx.action_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_registry_kinds() {
        let registry = schema_registry();
        assert_eq!(
            registry.action_ids(),
            vec![
                "aws:cloudwatch:assert-alarm-state",
                ECS_STOP_TASK,
                ECS_TASK_CPU_STRESS,
                "aws:fis:wait",
            ]
        );
        let stress = registry.lookup(ECS_TASK_CPU_STRESS).unwrap();
        assert!(stress.required_params.is_empty());
        assert!((stress.param_checks["duration"])("PT5M").is_ok());
        assert!((stress.param_checks["duration"])("five minutes").is_err());
    }

    #[test]
    fn test_render_vars_from_environment() {
        let mut env = EnvironmentConfig {
            account: Some("123456789012".into()),
            ..Default::default()
        };
        env.vars.insert("cluster".into(), "test-fargate".into());

        let vars = render_vars(&env);
        assert_eq!(vars.get("account"), Some("123456789012"));
        assert_eq!(vars.get("partition"), Some("aws"));
        assert_eq!(vars.get("cluster"), Some("test-fargate"));
        assert_eq!(vars.get("region"), None);
    }

    #[test]
    fn test_executor_config_from_sections() {
        let config = FaultlineConfig::from_toml(
            r#"
[executor]
max_concurrent_actions = 2
action_timeout_secs = 60
interrupt_in_flight = true

[monitor]
poll_interval_ms = 250
triggering_states = ["ALARM", " INSUFFICIENT_DATA ", ""]
"#,
        )
        .unwrap();
        let exec = executor_config(&config);
        assert_eq!(exec.max_concurrent_actions, 2);
        assert_eq!(exec.action_timeout, std::time::Duration::from_secs(60));
        assert_eq!(exec.poll_interval, std::time::Duration::from_millis(250));
        assert!(exec.interrupt_in_flight);
        assert_eq!(
            exec.triggering_states,
            vec![AlarmState::Alarm, AlarmState::InsufficientData]
        );

        let defaults = executor_config(&FaultlineConfig::new());
        assert_eq!(defaults.max_concurrent_actions, 8);
        assert_eq!(defaults.triggering_states, vec![AlarmState::Alarm]);
        assert!(!defaults.interrupt_in_flight);
    }

    #[test]
    fn test_collect_template_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "").unwrap();
        std::fs::write(dir.path().join("a.json"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = collect_template_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.yaml"]);

        assert!(collect_template_files(&[dir.path().join("missing.yaml")]).is_err());
    }
}
