//! Finds faultline's TOML layers and folds them into one [`FaultlineConfig`].
//!
//! The user file (`<config dir>/faultline/config.toml`) is read first and the
//! project's `faultline.toml` is merged over it, section by section. Command
//! line flags are applied by the binary afterwards.

use std::path::{Path, PathBuf};

use crate::{ConfigError, FaultlineConfig, Result};

/// Project-local config filename.
pub const PROJECT_CONFIG_FILE: &str = "faultline.toml";

/// Config filename within the user config directory.
pub const USER_CONFIG_FILE: &str = "config.toml";

const APP_NAME: &str = "faultline";

/// Overrides the platform config directory when set and non-empty.
const CONFIG_DIR_ENV: &str = "FAULTLINE_CONFIG_DIR";

/// Alarm states a monitor can observe.
const KNOWN_ALARM_STATES: &[&str] = &["OK", "ALARM", "INSUFFICIENT_DATA"];

/// One candidate layer file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// False when the file is absent or failed to parse.
    pub loaded: bool,
}

/// Merged config plus the layers that produced it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: FaultlineConfig,
    /// Every layer considered, user file first.
    pub sources: Vec<ConfigSource>,
    /// Unreadable layers and suspicious values.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Layers that contributed to `config`.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Merge the user and project layers, using `project_dir` (or the working
/// directory) for `faultline.toml`.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], reading the user layer from `config_dir` when given
/// instead of [`user_config_dir`].
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = FaultlineConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    check_alarm_states(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Parse a single config file.
pub fn load_config_file(path: &Path) -> Result<FaultlineConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    FaultlineConfig::from_toml(&contents)
}

/// Write `config` as TOML to `path`, creating missing directories.
pub fn save_config(config: &FaultlineConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Path of the user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory.
///
/// Checks `FAULTLINE_CONFIG_DIR` first, then falls back to the platform
/// default (`~/.config/faultline` on Linux).
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Merge one file into `config`. A missing file is skipped; a broken one
/// becomes a warning.
fn load_layer(
    config: &mut FaultlineConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

fn check_alarm_states(config: &FaultlineConfig, warnings: &mut Vec<String>) {
    let Some(ref monitor) = config.monitor else {
        return;
    };
    for state in &monitor.triggering_states {
        if !KNOWN_ALARM_STATES.contains(&state.as_str()) {
            warnings.push(format!(
                "[monitor] triggering state '{}' is not one of {}",
                state,
                KNOWN_ALARM_STATES.join(", ")
            ));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
