//! Action-kind registry.
//!
//! Maps an `actionId` such as `aws:fis:wait` to the parameters and target
//! roles it requires and the handler that performs it. The validator uses the
//! requirements; the executor uses the handler.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Everything a handler gets to know about one action invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Action name within the template.
    pub action_name: String,
    pub action_id: String,
    pub parameters: BTreeMap<String, String>,
    /// Role name → resolved resource ids. Empty targets are omitted.
    pub targets: BTreeMap<String, Vec<String>>,
    /// Cancelled when the run is aborted.
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn target(&self, role: &str) -> &[String] {
        self.targets.get(role).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A handler could not complete its action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionFailure(pub String);

impl ActionFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Performs one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> Result<(), ActionFailure>;
}

/// Static check of one parameter value, run at validation time.
pub type ParamCheck = fn(&str) -> Result<(), String>;

/// A registered action kind.
#[derive(Clone)]
pub struct ActionKind {
    pub required_params: Vec<String>,
    pub required_targets: Vec<String>,
    /// Parameter name → syntax check.
    pub param_checks: BTreeMap<String, ParamCheck>,
    pub handler: Arc<dyn ActionHandler>,
}

impl ActionKind {
    pub fn new(handler: Arc<dyn ActionHandler>) -> Self {
        Self {
            required_params: Vec::new(),
            required_targets: Vec::new(),
            param_checks: BTreeMap::new(),
            handler,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.required_params.push(name.into());
        self
    }

    pub fn with_target(mut self, role: impl Into<String>) -> Self {
        self.required_targets.push(role.into());
        self
    }

    /// Check the syntax of `name` whenever it is present.
    pub fn with_param_check(mut self, name: impl Into<String>, check: ParamCheck) -> Self {
        self.param_checks.insert(name.into(), check);
        self
    }
}

impl fmt::Debug for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionKind")
            .field("required_params", &self.required_params)
            .field("required_targets", &self.required_targets)
            .field("param_checks", &self.param_checks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Registry of action kinds keyed by `actionId`.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    kinds: HashMap<String, ActionKind>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `kind` under `action_id`, replacing any earlier entry.
    pub fn register(&mut self, action_id: impl Into<String>, kind: ActionKind) {
        self.kinds.insert(action_id.into(), kind);
    }

    pub fn lookup(&self, action_id: &str) -> Option<&ActionKind> {
        self.kinds.get(action_id)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.kinds.contains_key(action_id)
    }

    /// Registered action ids, sorted.
    pub fn action_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl ActionHandler for Noop {
        async fn execute(&self, _ctx: ActionContext) -> Result<(), ActionFailure> {
            Ok(())
        }
    }

    fn non_empty(v: &str) -> Result<(), String> {
        if v.is_empty() {
            Err("must not be empty".into())
        } else {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());
        registry.register(
            "aws:ecs:stop-task",
            ActionKind::new(Arc::new(Noop)).with_target("Tasks"),
        );

        assert!(registry.contains("aws:ecs:stop-task"));
        assert!(!registry.contains("aws:ec2:stop-instances"));
        let kind = registry.lookup("aws:ecs:stop-task").unwrap();
        assert_eq!(kind.required_targets, vec!["Tasks"]);
        assert!(kind.required_params.is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ActionRegistry::new();
        registry.register("k", ActionKind::new(Arc::new(Noop)));
        registry.register("k", ActionKind::new(Arc::new(Noop)).with_param("duration"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("k").unwrap().required_params, vec!["duration"]);
    }

    #[test]
    fn test_param_check_hook() {
        let kind = ActionKind::new(Arc::new(Noop)).with_param_check("duration", non_empty);
        let check = kind.param_checks["duration"];
        assert!(check("PT1M").is_ok());
        assert!(check("").is_err());
    }

    #[test]
    fn test_action_ids_sorted() {
        let mut registry = ActionRegistry::new();
        registry.register("b", ActionKind::new(Arc::new(Noop)));
        registry.register("a", ActionKind::new(Arc::new(Noop)));
        assert_eq!(registry.action_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_context_accessors() {
        let ctx = ActionContext {
            action_name: "stop".into(),
            action_id: "aws:ecs:stop-task".into(),
            parameters: [("duration".to_string(), "PT1M".to_string())].into(),
            targets: [("Tasks".to_string(), vec!["t-1".to_string()])].into(),
            cancel: CancellationToken::new(),
        };
        assert_eq!(ctx.parameter("duration"), Some("PT1M"));
        assert_eq!(ctx.parameter("missing"), None);
        assert_eq!(ctx.target("Tasks"), ["t-1".to_string()]);
        assert!(ctx.target("Other").is_empty());
    }
}
