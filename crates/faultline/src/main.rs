//! Faultline - declarative chaos experiments
//!
//! Main entry point for the faultline CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use faultline_config::LoggingConfig;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

mod commands;

use commands::{config, plan, render, validate};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Faultline - validate, plan and render chaos experiment templates
#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: platform config dir)
    #[arg(long, global = true, env = "FAULTLINE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate experiment templates
    Validate(validate::ValidateArgs),

    /// Show the execution order of an experiment
    Plan(plan::PlanArgs),

    /// Substitute placeholders and print the deployable template
    Render(render::RenderArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

const VERBOSE_FILTER: &str = "faultline=debug,faultline_experiment=debug,faultline_config=debug,info";
const DEFAULT_FILTER: &str = "faultline=info,faultline_experiment=warn,warn";
const FILE_FILTER: &str = "faultline=trace,faultline_experiment=trace,faultline_config=trace,info";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = faultline_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    loaded.config.validate()?;

    let _guard = init_tracing(
        cli.verbose,
        &loaded.config.logging(),
        cli.config_dir.as_deref(),
    )?;
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let ctx = commands::Context {
        json_output: cli.json,
        config_dir: cli.config_dir,
        loaded,
    };

    match cli.command {
        Commands::Validate(args) => validate::run(args, &ctx),
        Commands::Plan(args) => plan::run(args, &ctx),
        Commands::Render(args) => render::run(args, &ctx),
        Commands::Config(args) => config::run(args, &ctx),
    }
}

/// Console layer on stderr, plus a daily-rolling JSON file when `[logging]`
/// asks for one. The returned guard flushes the file writer on drop.
fn init_tracing(
    verbose: bool,
    logging: &LoggingConfig,
    config_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let console_filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.as_deref().unwrap_or(DEFAULT_FILTER)))
    };

    let (file_layer, guard) = if logging.json_file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| config_dir.map(|d| d.join("logs")))
            .or_else(|| faultline_config::user_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("faultline")
            .filename_suffix("log")
            .build(&log_dir)
            .with_context(|| format!("failed to open log directory {}", log_dir.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(EnvFilter::new(FILE_FILTER));
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
