//! Domain nodes: identity, location, schema and values.

pub mod id;
pub mod path;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{NodeError, SerializationError};

pub use id::UniqueId;
pub use path::NodePath;
pub use schema::{NodeType, PropertyDescriptor, PropertyKind, Schema, ValueComparer};

static NULL: Value = Value::Null;

/// Resolves cross-node references within one snapshot.
///
/// Passed explicitly wherever references are checked or followed.
pub trait ReferenceResolver {
    /// Whether a node exists at `path`.
    fn exists(&self, path: &NodePath) -> Result<bool, SerializationError>;

    /// Load the node at `path`, if any.
    fn resolve(&self, path: &NodePath) -> Result<Option<Arc<Node>>, SerializationError>;
}

/// A domain entity persisted as one data file.
///
/// Every property declared on the node type has a slot; undeclared
/// properties cannot be set.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    node_type: Arc<NodeType>,
    id: UniqueId,
    path: Option<NodePath>,
    values: BTreeMap<String, Value>,
}

impl Node {
    /// Empty node of `node_type` with every property null.
    pub fn new(node_type: Arc<NodeType>, id: UniqueId) -> Self {
        let values = node_type
            .properties()
            .iter()
            .map(|p| (p.name.clone(), Value::Null))
            .collect();
        Self {
            node_type,
            id,
            path: None,
            values,
        }
    }

    pub fn node_type(&self) -> &Arc<NodeType> {
        &self.node_type
    }

    pub fn type_name(&self) -> &str {
        self.node_type.name()
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn path(&self) -> Option<&NodePath> {
        self.path.as_ref()
    }

    /// Assign the node's location. A node keeps its first path.
    pub fn set_path(&mut self, path: NodePath) -> Result<(), NodeError> {
        match &self.path {
            Some(existing) if *existing != path => Err(NodeError::PathAlreadyAssigned {
                id: self.id.to_string(),
                existing: existing.to_string(),
            }),
            _ => {
                self.path = Some(path);
                Ok(())
            }
        }
    }

    pub fn with_path(mut self, path: NodePath) -> Result<Self, NodeError> {
        self.set_path(path)?;
        Ok(self)
    }

    /// Value of a declared property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Set a declared property.
    pub fn set(&mut self, property: &str, value: Value) -> Result<(), NodeError> {
        match self.values.get_mut(property) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.unknown(property)),
        }
    }

    pub fn with(mut self, property: &str, value: Value) -> Result<Self, NodeError> {
        self.set(property, value)?;
        Ok(self)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Paths held by a `Reference` or `ReferenceList` property.
    pub fn references(&self, property: &str) -> Result<Vec<NodePath>, NodeError> {
        let descriptor = self
            .node_type
            .property(property)
            .ok_or_else(|| self.unknown(property))?;
        let invalid = || NodeError::InvalidReference {
            node_type: self.type_name().to_string(),
            property: property.to_string(),
        };
        let value = self.values.get(property).unwrap_or(&NULL);
        match (descriptor.kind, value) {
            (PropertyKind::Value, _) => Err(invalid()),
            (_, Value::Null) => Ok(Vec::new()),
            (PropertyKind::Reference, Value::String(s)) => {
                Ok(vec![NodePath::parse(s).map_err(|_| invalid())?])
            }
            (PropertyKind::ReferenceList, Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => NodePath::parse(s).map_err(|_| invalid()),
                    _ => Err(invalid()),
                })
                .collect(),
            _ => Err(invalid()),
        }
    }

    /// Point a `Reference` property at another node.
    pub fn set_reference(
        &mut self,
        property: &str,
        target: Option<&NodePath>,
    ) -> Result<(), NodeError> {
        let descriptor = self
            .node_type
            .property(property)
            .ok_or_else(|| self.unknown(property))?;
        if descriptor.kind != PropertyKind::Reference {
            return Err(NodeError::InvalidReference {
                node_type: self.type_name().to_string(),
                property: property.to_string(),
            });
        }
        let value = target
            .map(|p| Value::String(p.folder_path().to_string()))
            .unwrap_or(Value::Null);
        self.set(property, value)
    }

    /// Follow a `Reference` property through `resolver`.
    pub fn resolve_reference(
        &self,
        property: &str,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Option<Arc<Node>>, SerializationError> {
        match self.references(property)?.first() {
            Some(target) => resolver.resolve(target),
            None => Ok(None),
        }
    }

    fn unknown(&self, property: &str) -> NodeError {
        NodeError::UnknownProperty {
            node_type: self.type_name().to_string(),
            property: property.to_string(),
        }
    }
}
