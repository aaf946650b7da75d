//! Plan command - shows the order an experiment's actions would run in.

use std::path::Path;

use anyhow::{Result, anyhow, bail};
use clap::Args;
use console::{Style, style};
use faultline_experiment::{
    ExecutorConfig, ExperimentTemplate, LoadEvent, TemplateLoader, ValidatedTemplate,
    ValidationErrors, Validator,
};
use serde::Serialize;

use super::{Context, executor_config, schema_registry, templates_dir, validator};

/// Arguments for the plan command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Template file, or the name of a template in the `[templates]` directory
    pub template: String,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    description: String,
    steps: Vec<PlanStep>,
    stop_conditions: Vec<PlanStopCondition>,
    settings: PlanSettings,
}

/// Executor limits a run of this plan would use.
#[derive(Debug, Serialize)]
struct PlanSettings {
    max_concurrent_actions: usize,
    action_timeout_secs: u64,
    poll_interval_ms: u64,
    triggering_states: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PlanStep {
    position: usize,
    name: String,
    action_id: String,
    start_after: Vec<String>,
    targets: Vec<PlanTarget>,
}

#[derive(Debug, Serialize)]
struct PlanTarget {
    role: String,
    target: String,
    resource_type: String,
    selection_mode: String,
}

#[derive(Debug, Serialize)]
struct PlanStopCondition {
    source: String,
    value: Option<String>,
}

/// Run the plan command.
pub fn run(args: PlanArgs, ctx: &Context) -> Result<()> {
    let registry = schema_registry();
    let validator = validator(&registry);
    let validated = load_validated(&args.template, ctx, &validator)?;
    let plan = build_plan(&validated, &executor_config(ctx.config()));

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&args.template, &plan);
    }
    Ok(())
}

/// A file path wins; otherwise look the name up in the templates directory.
fn load_validated(
    spec: &str,
    ctx: &Context,
    validator: &Validator<'_>,
) -> Result<ValidatedTemplate> {
    let path = Path::new(spec);
    if path.is_file() {
        let template = ExperimentTemplate::from_file(path)?;
        return validator
            .validate(&template)
            .map_err(|errors| invalid(&path.display().to_string(), &errors));
    }

    let dir = templates_dir(ctx.config())
        .ok_or_else(|| anyhow!("No such template file: {}", spec))?;
    let loader = TemplateLoader::new(dir);
    for event in loader.load_all(validator)? {
        if let LoadEvent::Error { path, error } = event
            && path.file_stem() == Some(std::ffi::OsStr::new(spec))
        {
            bail!("{}: {}", path.display(), error);
        }
    }
    loader
        .get(spec)
        .ok_or_else(|| anyhow!("Template '{}' not found in {}", spec, dir.display()))
}

fn invalid(name: &str, errors: &ValidationErrors) -> anyhow::Error {
    let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
    anyhow!("{} is invalid:\n{}", name, lines.join("\n"))
}

fn build_plan(validated: &ValidatedTemplate, exec: &ExecutorConfig) -> PlanOutput {
    let template = validated.template();
    let graph = validated.graph();

    let steps = graph
        .topological_order()
        .into_iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let action = template.actions.get(name)?;
            let targets = action
                .targets
                .iter()
                .filter_map(|(role, target)| {
                    let spec = template.targets.get(target)?;
                    Some(PlanTarget {
                        role: role.clone(),
                        target: target.clone(),
                        resource_type: spec.resource_type.clone(),
                        selection_mode: spec
                            .selection()
                            .map(|mode| mode.to_string())
                            .unwrap_or_else(|_| spec.selection_mode.clone()),
                    })
                })
                .collect();
            Some(PlanStep {
                position: i + 1,
                name: name.to_string(),
                action_id: action.action_id.clone(),
                start_after: graph
                    .predecessors(name)
                    .into_iter()
                    .map(String::from)
                    .collect(),
                targets,
            })
        })
        .collect();

    PlanOutput {
        description: template.description.clone(),
        steps,
        stop_conditions: template
            .stop_conditions
            .iter()
            .map(|c| PlanStopCondition {
                source: c.source.clone(),
                value: c.value.clone(),
            })
            .collect(),
        settings: PlanSettings {
            max_concurrent_actions: exec.max_concurrent_actions,
            action_timeout_secs: exec.action_timeout.as_secs(),
            poll_interval_ms: u64::try_from(exec.poll_interval.as_millis()).unwrap_or(u64::MAX),
            triggering_states: exec.triggering_states.iter().map(ToString::to_string).collect(),
        },
    }
}

fn print_plan(name: &str, plan: &PlanOutput) {
    let dim = Style::new().dim();
    let cyan = Style::new().cyan();

    println!();
    println!("{} {}", style("Plan for").bold(), style(name).bold());
    if !plan.description.is_empty() {
        println!("{}", dim.apply_to(&plan.description));
    }
    println!("{}", dim.apply_to("─".repeat(40)));

    for step in &plan.steps {
        println!(
            "  {}. {} {}",
            step.position,
            cyan.apply_to(&step.name),
            dim.apply_to(format!("({})", step.action_id))
        );
        if !step.start_after.is_empty() {
            println!(
                "       {} {}",
                dim.apply_to("after:"),
                step.start_after.join(", ")
            );
        }
        for target in &step.targets {
            println!(
                "       {} {} → {} {}",
                dim.apply_to("target:"),
                target.role,
                target.target,
                dim.apply_to(format!("[{} {}]", target.resource_type, target.selection_mode))
            );
        }
    }

    println!();
    if plan.stop_conditions.is_empty() {
        println!("{}", dim.apply_to("No stop conditions"));
    } else {
        println!("{}", style("Stop conditions:").bold());
        for condition in &plan.stop_conditions {
            match &condition.value {
                Some(value) => println!("  {} {}", condition.source, dim.apply_to(value)),
                None => println!("  {}", condition.source),
            }
        }
    }
    let settings = &plan.settings;
    println!(
        "{}",
        dim.apply_to(format!(
            "Up to {} actions at once, {}s per action; stop conditions polled every {}ms, triggering on {}",
            settings.max_concurrent_actions,
            settings.action_timeout_secs,
            settings.poll_interval_ms,
            settings.triggering_states.join(", ")
        ))
    );
    println!();
}
