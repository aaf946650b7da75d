//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use faultline_config::{
    EnvironmentConfig, ExecutorSection, FaultlineConfig, LoggingConfig, MonitorConfig,
    PROJECT_CONFIG_FILE, TemplatesConfig, USER_CONFIG_FILE,
};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show the user config file path
    Path,

    /// Write a config file with every section at its defaults
    Init {
        /// Create project-local config (./faultline.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local } => cmd_init(ctx, local),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = ctx.config();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("# Faultline Configuration\n");
    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for source in &sources {
            println!("# from {}", source.display());
        }
        println!();
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    println!("Config file search order (later overrides earlier):\n");

    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = ctx.loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'faultline config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }
    for warning in &ctx.loaded.warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let path = user_config_file(ctx)?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_init(ctx: &Context, local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from(PROJECT_CONFIG_FILE)
    } else {
        user_config_file(ctx)?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    faultline_config::save_config(&default_config(), &path)?;
    println!("Created {}", path.display());
    Ok(())
}

fn user_config_file(ctx: &Context) -> Result<PathBuf> {
    match &ctx.config_dir {
        Some(dir) => Ok(dir.join(USER_CONFIG_FILE)),
        None => faultline_config::user_config_path()
            .ok_or_else(|| anyhow!("Could not determine config directory")),
    }
}

/// Every section present, so the written file documents the available keys.
fn default_config() -> FaultlineConfig {
    FaultlineConfig {
        environment: Some(EnvironmentConfig::default()),
        executor: Some(ExecutorSection::default()),
        monitor: Some(MonitorConfig::default()),
        logging: Some(LoggingConfig {
            level: Some("info".to_string()),
            ..Default::default()
        }),
        templates: Some(TemplatesConfig {
            dir: Some(PathBuf::from("experiments")),
        }),
    }
}
