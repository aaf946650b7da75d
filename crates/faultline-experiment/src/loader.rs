//! Template directory loader.
//!
//! Loads every `.json`, `.yaml`/`.yml` and `.toml` file in a directory
//! (non-recursive), renders and validates each, and keeps the valid ones keyed
//! by file stem. A broken file is reported as [`LoadEvent::Error`] and does not
//! stop the others from loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ExperimentError, Result};
use crate::render::RenderVars;
use crate::template::{ExperimentTemplate, TemplateFormat};
use crate::validate::{ValidatedTemplate, Validator};

/// Outcome of loading one file.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// A template was loaded (or replaced).
    Loaded { name: String, path: PathBuf },
    /// A template file failed to parse, render or validate.
    Error { path: PathBuf, error: String },
}

#[derive(Debug, Clone)]
struct LoadedTemplate {
    template: ValidatedTemplate,
    path: PathBuf,
}

/// Loads experiment templates from a directory.
pub struct TemplateLoader {
    dir: PathBuf,
    vars: Option<RenderVars>,
    templates: RwLock<BTreeMap<String, LoadedTemplate>>,
}

impl TemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            vars: None,
            templates: RwLock::new(BTreeMap::new()),
        }
    }

    /// Render placeholders with `vars` before validating each file.
    pub fn with_vars(mut self, vars: RenderVars) -> Self {
        self.vars = Some(vars);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every template file in the directory, in file-name order.
    ///
    /// Fails only if the directory itself cannot be read.
    pub fn load_all(&self, validator: &Validator<'_>) -> Result<Vec<LoadEvent>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| ExperimentError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && TemplateFormat::from_path(path).is_some())
            .collect();
        paths.sort();

        let events: Vec<LoadEvent> = paths
            .iter()
            .map(|path| self.load_file(path, validator))
            .collect();

        info!(
            "Loaded {} experiment templates from {}",
            self.templates.read().len(),
            self.dir.display()
        );
        Ok(events)
    }

    /// Load or reload a single template file.
    pub fn load_file(&self, path: &Path, validator: &Validator<'_>) -> LoadEvent {
        debug!("Loading template file: {}", path.display());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.prepare(path, validator) {
            Ok(template) => {
                self.templates.write().insert(
                    name.clone(),
                    LoadedTemplate {
                        template,
                        path: path.to_path_buf(),
                    },
                );
                info!("Template loaded: {} (from {})", name, path.display());
                LoadEvent::Loaded {
                    name,
                    path: path.to_path_buf(),
                }
            }
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                LoadEvent::Error {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn prepare(&self, path: &Path, validator: &Validator<'_>) -> Result<ValidatedTemplate> {
        let mut template = ExperimentTemplate::from_file(path)?;
        if let Some(vars) = &self.vars {
            template = vars.render(&template)?;
        }
        Ok(validator.validate(&template)?)
    }

    pub fn get(&self, name: &str) -> Option<ValidatedTemplate> {
        self.templates.read().get(name).map(|t| t.template.clone())
    }

    /// File a template was loaded from.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.templates.read().get(name).map(|t| t.path.clone())
    }

    /// Loaded template names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        self.templates.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}
