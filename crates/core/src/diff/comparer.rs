//! Property-level comparison of two versions of a node.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DiffError;
use crate::node::{Node, NodeType, PropertyDescriptor};

static NULL: Value = Value::Null;

/// One property whose value differs between two node versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub property: String,
    pub old: Value,
    pub new: Value,
}

/// Which properties take part in comparisons, and how many differences to
/// collect before stopping.
///
/// The compared descriptor list is cached per node type, so reuse one policy
/// across many comparisons.
#[derive(Debug, Default)]
pub struct ComparisonPolicy {
    ignored: BTreeSet<String>,
    max_differences: Option<usize>,
    cache: Mutex<HashMap<String, Arc<[PropertyDescriptor]>>>,
}

impl Clone for ComparisonPolicy {
    fn clone(&self) -> Self {
        Self {
            ignored: self.ignored.clone(),
            max_differences: self.max_differences,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl ComparisonPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip `property` on every node type.
    pub fn ignore(mut self, property: impl Into<String>) -> Self {
        self.ignored.insert(property.into());
        self.cache = Mutex::new(HashMap::new());
        self
    }

    /// Stop after `max` differences; `None` is uncapped.
    pub fn with_max_differences(mut self, max: Option<usize>) -> Self {
        self.max_differences = max;
        self
    }

    pub fn ignored(&self) -> &BTreeSet<String> {
        &self.ignored
    }

    pub fn max_differences(&self) -> Option<usize> {
        self.max_differences
    }

    /// Descriptors of `node_type` that are compared and merged.
    pub fn properties(&self, node_type: &NodeType) -> Arc<[PropertyDescriptor]> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cached) = cache.get(node_type.name()) {
            return Arc::clone(cached);
        }
        let properties: Arc<[PropertyDescriptor]> = node_type
            .properties()
            .iter()
            .filter(|p| !self.ignored.contains(&p.name))
            .cloned()
            .collect();
        cache.insert(node_type.name().to_string(), Arc::clone(&properties));
        properties
    }

    /// Properties whose values differ between `old` and `new`.
    pub fn compare(&self, old: &Node, new: &Node) -> Result<Vec<FieldDifference>, DiffError> {
        if old.type_name() != new.type_name() {
            let path = new
                .path()
                .or(old.path())
                .map(|p| p.to_string())
                .unwrap_or_else(|| new.id().to_string());
            return Err(DiffError::TypeMismatch {
                path,
                old: old.type_name().to_string(),
                new: new.type_name().to_string(),
            });
        }

        let limit = self.max_differences.unwrap_or(usize::MAX);
        let mut differences = Vec::new();
        for descriptor in self.properties(new.node_type()).iter() {
            if differences.len() >= limit {
                break;
            }
            let before = old.get(&descriptor.name).unwrap_or(&NULL);
            let after = new.get(&descriptor.name).unwrap_or(&NULL);
            if !descriptor.equals(before, after) {
                differences.push(FieldDifference {
                    property: descriptor.name.clone(),
                    old: before.clone(),
                    new: after.clone(),
                });
            }
        }
        Ok(differences)
    }
}
