//! Render command - substitutes placeholders and prints the deployable template.

use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, ValueEnum};
use faultline_experiment::ExperimentTemplate;

use super::{Context, render_vars, schema_registry, validator};

/// Arguments for the render command.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Template file
    pub template: PathBuf,

    /// Account id (default: `[environment] account`)
    #[arg(long)]
    pub account: Option<String>,

    /// Region (default: `[environment] region`)
    #[arg(long)]
    pub region: Option<String>,

    /// Partition (default: `[environment] partition`)
    #[arg(long)]
    pub partition: Option<String>,

    /// Extra placeholder variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip validating the rendered template
    #[arg(long)]
    pub no_validate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Run the render command.
pub fn run(args: RenderArgs, ctx: &Context) -> Result<()> {
    let mut vars = render_vars(&ctx.config().environment());
    if let Some(account) = args.account {
        vars = vars.account(account);
    }
    if let Some(region) = args.region {
        vars = vars.region(region);
    }
    if let Some(partition) = args.partition {
        vars = vars.partition(partition);
    }
    for (name, value) in args.vars {
        vars = vars.var(name, value);
    }

    let template = ExperimentTemplate::from_file(&args.template)?;
    let rendered = vars.render(&template)?;

    if !args.no_validate {
        let registry = schema_registry();
        if let Err(errors) = validator(&registry).validate(&rendered) {
            let lines: Vec<String> = errors.iter().map(|e| format!("  - {}", e)).collect();
            return Err(anyhow!(
                "rendered template is invalid:\n{}",
                lines.join("\n")
            ));
        }
    }

    // --json wins over --format
    let format = if ctx.json_output {
        OutputFormat::Json
    } else {
        args.format
    };
    let mut text = match format {
        OutputFormat::Json => rendered.to_json()?,
        OutputFormat::Yaml => rendered.to_yaml()?,
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }

    match args.output {
        Some(path) => {
            std::fs::write(&path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Rendered template written to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((name.to_string(), value.to_string()))
}
