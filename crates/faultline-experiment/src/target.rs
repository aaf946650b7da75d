//! Target resolution.
//!
//! Turns a [`TargetSpec`] into a concrete, ordered list of resource ids:
//!
//! 1. query the inventory for the resource type and tag filters
//! 2. keep resources whose attributes pass every filter
//! 3. sort by id and take the number the selection mode asks for
//!
//! Sorting before sampling makes the blast radius a pure function of the
//! candidate set, so re-resolving the same target picks the same resources.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExperimentError, Result, ValidationError, ValidationErrors};
use crate::selection::SelectionMode;
use crate::template::{EmptyTargetResolutionMode, Filter, TargetSpec};

/// A resource as reported by the inventory.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Attribute document navigated by filter paths.
    #[serde(default)]
    pub attributes: Value,
}

impl ResourceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeMap::new(),
            attributes: Value::Object(Default::default()),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.attributes.is_object() {
            self.attributes = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.attributes {
            map.insert(key.into(), value);
        }
        self
    }
}

/// The inventory query failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct InventoryError(pub String);

/// External resource inventory.
#[async_trait]
pub trait ResourceInventory: Send + Sync {
    /// Resources of `resource_type` carrying every tag in `tags`.
    async fn query(
        &self,
        resource_type: &str,
        tags: &BTreeMap<String, String>,
    ) -> std::result::Result<Vec<ResourceRecord>, InventoryError>;
}

/// Inventory backed by an in-memory list of typed records.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    resources: RwLock<Vec<(String, ResourceRecord)>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, resource_type: impl Into<String>, record: ResourceRecord) {
        self.resources.write().push((resource_type.into(), record));
    }

    pub fn clear(&self) {
        self.resources.write().clear();
    }
}

#[async_trait]
impl ResourceInventory for InMemoryInventory {
    async fn query(
        &self,
        resource_type: &str,
        tags: &BTreeMap<String, String>,
    ) -> std::result::Result<Vec<ResourceRecord>, InventoryError> {
        Ok(self
            .resources
            .read()
            .iter()
            .filter(|(rt, record)| rt == resource_type && tags_match(record, tags))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

/// Outcome of resolving a target under an empty-target policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetResolution {
    /// Non-empty, ordered resource ids.
    Resolved(Vec<String>),
    /// Resolved empty under the `skip` policy.
    Empty,
}

/// Resolves targets against an inventory.
#[derive(Clone)]
pub struct TargetResolver {
    inventory: Arc<dyn ResourceInventory>,
}

impl TargetResolver {
    pub fn new(inventory: Arc<dyn ResourceInventory>) -> Self {
        Self { inventory }
    }

    /// Resolve `spec` to resource ids. Empty only if nothing matched (or the
    /// mode selects zero).
    pub async fn resolve(&self, name: &str, spec: &TargetSpec) -> Result<Vec<String>> {
        let mode: SelectionMode = spec.selection().map_err(|reason| {
            ExperimentError::Validation(ValidationErrors(vec![
                ValidationError::InvalidSelectionMode {
                    target: name.to_string(),
                    value: spec.selection_mode.clone(),
                    reason,
                },
            ]))
        })?;

        let candidates = self
            .inventory
            .query(&spec.resource_type, &spec.resource_tags)
            .await
            .map_err(|e| ExperimentError::Inventory {
                target: name.to_string(),
                message: e.to_string(),
            })?;
        let fetched = candidates.len();

        let mut ids: Vec<String> = candidates
            .into_iter()
            .filter(|r| tags_match(r, &spec.resource_tags))
            .filter(|r| spec.resource_arns.is_empty() || spec.resource_arns.contains(&r.id))
            .filter(|r| spec.filters.iter().all(|f| filter_matches(r, f)))
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids.dedup();

        let matched = ids.len();
        ids.truncate(mode.select_count(matched));

        debug!(
            target_name = %name,
            resource_type = %spec.resource_type,
            fetched,
            matched,
            selected = ids.len(),
            mode = %mode,
            "Resolved target"
        );

        Ok(ids)
    }

    /// Resolve `spec` and apply the empty-target policy.
    ///
    /// Under `fail`, an empty result is an `EmptyTarget` error naming
    /// `dependents`; under `skip` it is [`TargetResolution::Empty`].
    pub async fn resolve_with_policy(
        &self,
        name: &str,
        spec: &TargetSpec,
        policy: EmptyTargetResolutionMode,
        dependents: &[String],
    ) -> Result<TargetResolution> {
        let ids = self.resolve(name, spec).await?;
        if !ids.is_empty() {
            return Ok(TargetResolution::Resolved(ids));
        }
        match policy {
            EmptyTargetResolutionMode::Fail => Err(ExperimentError::EmptyTarget {
                target: name.to_string(),
                actions: dependents.to_vec(),
            }),
            EmptyTargetResolutionMode::Skip => {
                warn!(target_name = %name, "Target resolved to no resources; skipping dependents");
                Ok(TargetResolution::Empty)
            }
        }
    }
}

fn tags_match(record: &ResourceRecord, tags: &BTreeMap<String, String>) -> bool {
    tags.iter().all(|(k, v)| record.tags.get(k) == Some(v))
}

/// True when the attribute at `filter.path` equals one of `filter.values`.
/// Arrays along the path match if any element does.
fn filter_matches(record: &ResourceRecord, filter: &Filter) -> bool {
    let segments: Vec<&str> = filter.path.split('.').filter(|s| !s.is_empty()).collect();
    attribute_matches(&record.attributes, &segments, &filter.values)
}

fn attribute_matches(value: &Value, path: &[&str], allowed: &[String]) -> bool {
    match (value, path.split_first()) {
        (Value::Array(items), _) => items.iter().any(|v| attribute_matches(v, path, allowed)),
        (Value::Object(map), Some((head, rest))) => map
            .get(*head)
            .is_some_and(|v| attribute_matches(v, rest, allowed)),
        (_, Some(_)) => false,
        (Value::String(s), None) => allowed.iter().any(|a| a == s),
        (Value::Null, None) => false,
        (other, None) => {
            let rendered = other.to_string();
            allowed.iter().any(|a| *a == rendered)
        }
    }
}
