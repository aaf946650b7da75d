//! Validate command - static checks for experiment templates.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow, bail};
use clap::Args;
use console::Style;
use faultline_experiment::{ExperimentTemplate, LoadEvent, TemplateLoader, Validator};
use serde::Serialize;

use super::{Context, collect_template_files, schema_registry, templates_dir, validator};

/// Arguments for the validate command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Template files or directories (default: the `[templates]` directory)
    pub paths: Vec<PathBuf>,
}

/// Outcome for one template file.
#[derive(Debug, Serialize)]
struct FileReport {
    path: String,
    valid: bool,
    actions: usize,
    errors: Vec<String>,
}

/// Run the validate command.
pub fn run(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let registry = schema_registry();
    let validator = validator(&registry);

    let reports = if args.paths.is_empty() {
        let dir = templates_dir(ctx.config()).ok_or_else(|| {
            anyhow!("No template paths given and no [templates] dir configured")
        })?;
        load_directory(dir, &validator)?
    } else {
        collect_template_files(&args.paths)?
            .iter()
            .map(|path| check_file(path, &validator))
            .collect()
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if invalid > 0 {
        bail!("{} of {} templates failed validation", invalid, reports.len());
    }
    Ok(())
}

fn check_file(path: &Path, validator: &Validator<'_>) -> FileReport {
    let mut report = FileReport {
        path: path.display().to_string(),
        valid: false,
        actions: 0,
        errors: Vec::new(),
    };

    let template = match ExperimentTemplate::from_file(path) {
        Ok(template) => template,
        Err(e) => {
            report.errors.push(e.to_string());
            return report;
        }
    };
    report.actions = template.actions.len();

    match validator.validate(&template) {
        Ok(_) => report.valid = true,
        Err(errors) => report.errors = errors.iter().map(ToString::to_string).collect(),
    }
    report
}

fn load_directory(dir: &Path, validator: &Validator<'_>) -> Result<Vec<FileReport>> {
    let loader = TemplateLoader::new(dir);
    let events = loader.load_all(validator)?;

    Ok(events
        .into_iter()
        .map(|event| match event {
            LoadEvent::Loaded { name, path } => FileReport {
                path: path.display().to_string(),
                valid: true,
                actions: loader
                    .get(&name)
                    .map(|t| t.template().actions.len())
                    .unwrap_or_default(),
                errors: Vec::new(),
            },
            LoadEvent::Error { path, error } => FileReport {
                path: path.display().to_string(),
                valid: false,
                actions: 0,
                errors: vec![error],
            },
        })
        .collect())
}

fn print_reports(reports: &[FileReport]) {
    let green = Style::new().green();
    let red = Style::new().red();
    let dim = Style::new().dim();

    for report in reports {
        if report.valid {
            println!(
                "{} {} {}",
                green.apply_to("✓"),
                report.path,
                dim.apply_to(format!("({} actions)", report.actions))
            );
        } else {
            println!("{} {}", red.apply_to("✗"), report.path);
            for error in &report.errors {
                println!("    - {}", error);
            }
        }
    }

    if reports.is_empty() {
        println!("{}", dim.apply_to("No template files found"));
    }
}
