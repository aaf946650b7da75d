//! Configuration system for the faultline experiment runner.
//!
//! Provides TOML-based configuration with:
//! - Environment variables for template rendering (`[environment]`)
//! - Executor and stop-condition monitor tuning (`[executor]`, `[monitor]`)
//! - Log level and file output (`[logging]`)
//! - Template directory (`[templates]`)
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, PROJECT_CONFIG_FILE, USER_CONFIG_FILE, load_config,
    load_config_file, load_config_with_options, save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
