//! Placeholder rendering for templates.
//!
//! Substitutes `{{name}}` placeholders with construction-time variables before
//! validation. The standard variables are `account`, `region` and `partition`;
//! callers may add their own. Rendering is plain text substitution, so the
//! rest of the crate never has to understand provider identifier syntax.
//!
//! Rendered fields:
//!
//! - action parameter values
//! - target `resourceArns`
//! - stop-condition values
//! - `roleArn`

use std::collections::BTreeMap;

use crate::error::{ExperimentError, Result};
use crate::template::ExperimentTemplate;

/// Variables available to placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderVars {
    vars: BTreeMap<String, String>,
}

impl RenderVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(self, account: impl Into<String>) -> Self {
        self.var("account", account)
    }

    pub fn region(self, region: impl Into<String>) -> Self {
        self.var("region", region)
    }

    pub fn partition(self, partition: impl Into<String>) -> Self {
        self.var("partition", partition)
    }

    /// Set an arbitrary variable, replacing any earlier value.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Replace every `{{name}}` in `input`. An unclosed `{{` is left as text.
    pub fn render_str(&self, input: &str) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(input.len());
        let mut remaining = input;

        while let Some(start) = remaining.find("{{") {
            let Some(len) = remaining[start + 2..].find("}}") else {
                break;
            };
            let name = remaining[start + 2..start + 2 + len].trim();
            let value = self
                .get(name)
                .ok_or_else(|| format!("unknown placeholder '{{{{{name}}}}}'"))?;
            out.push_str(&remaining[..start]);
            out.push_str(value);
            remaining = &remaining[start + 2 + len + 2..];
        }
        out.push_str(remaining);
        Ok(out)
    }

    /// Render every placeholder-bearing field of `template`.
    pub fn render(&self, template: &ExperimentTemplate) -> Result<ExperimentTemplate> {
        let mut rendered = template.clone();
        let field = |location: String, value: &str| {
            self.render_str(value)
                .map_err(|reason| ExperimentError::Render(format!("{location}: {reason}")))
        };

        for (name, action) in rendered.actions.iter_mut() {
            for (param, value) in action.parameters.iter_mut() {
                *value = field(format!("actions.{name}.parameters.{param}"), value.as_str())?;
            }
        }
        for (name, target) in rendered.targets.iter_mut() {
            for (i, arn) in target.resource_arns.iter_mut().enumerate() {
                *arn = field(format!("targets.{name}.resourceArns[{i}]"), arn.as_str())?;
            }
        }
        for (i, condition) in rendered.stop_conditions.iter_mut().enumerate() {
            if let Some(value) = condition.value.as_mut() {
                *value = field(format!("stopConditions[{i}].value"), value.as_str())?;
            }
        }
        if let Some(role) = rendered.role_arn.as_mut() {
            *role = field("roleArn".to_string(), role.as_str())?;
        }

        Ok(rendered)
    }
}
