//! Property descriptors and the node type registry.
//!
//! Node types are declared once (in code or from configuration) as a list of
//! property descriptors. Comparison and merging walk these descriptors instead
//! of inspecting values at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NodeError;

/// Names that cannot be used as property names.
pub const RESERVED_PROPERTY_NAMES: &[&str] = &["$type", "id"];

/// What a property holds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Plain JSON value.
    #[default]
    Value,
    /// Folder path of another node in the same snapshot, or null.
    Reference,
    /// Array of folder paths of other nodes.
    ReferenceList,
}

/// Equality used when comparing two values of a property.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueComparer {
    /// Deep structural equality.
    #[default]
    Exact,
    /// Strings compare ignoring ASCII case; other values compare exactly.
    CaseInsensitive,
    /// Arrays compare as multisets; other values compare exactly.
    Unordered,
}

impl ValueComparer {
    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        match self {
            Self::Exact => a == b,
            Self::CaseInsensitive => match (a, b) {
                (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
                _ => a == b,
            },
            Self::Unordered => match (a, b) {
                (Value::Array(x), Value::Array(y)) => {
                    if x.len() != y.len() {
                        return false;
                    }
                    let mut remaining: Vec<&Value> = y.iter().collect();
                    x.iter().all(|item| {
                        match remaining.iter().position(|candidate| *candidate == item) {
                            Some(pos) => {
                                remaining.swap_remove(pos);
                                true
                            }
                            None => false,
                        }
                    })
                }
                _ => a == b,
            },
        }
    }
}

/// One modifiable property of a node type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub kind: PropertyKind,
    #[serde(default)]
    pub comparer: ValueComparer,
}

impl PropertyDescriptor {
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Value,
            comparer: ValueComparer::Exact,
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Reference,
            comparer: ValueComparer::Exact,
        }
    }

    pub fn reference_list(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::ReferenceList,
            comparer: ValueComparer::Unordered,
        }
    }

    pub fn with_comparer(mut self, comparer: ValueComparer) -> Self {
        self.comparer = comparer;
        self
    }

    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        self.comparer.equals(a, b)
    }
}

/// Declared shape of a kind of node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeType {
    name: String,
    folder_name: String,
    properties: Vec<PropertyDescriptor>,
}

impl NodeType {
    /// Declare a node type stored under `folder_name`.
    pub fn new(name: impl Into<String>, folder_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folder_name: folder_name.into(),
            properties: Vec::new(),
        }
    }

    /// Add a property descriptor (builder style).
    pub fn with_property(mut self, descriptor: PropertyDescriptor) -> Self {
        self.properties.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.name.is_empty() {
            return Err(NodeError::UnknownType(String::new()));
        }
        if self.folder_name.is_empty() || self.folder_name.contains('/') {
            return Err(NodeError::InvalidPath {
                path: self.folder_name.clone(),
                detail: format!("bad folder name for type '{}'", self.name),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.properties {
            if p.name.is_empty() || RESERVED_PROPERTY_NAMES.contains(&p.name.as_str()) {
                return Err(NodeError::UnknownProperty {
                    node_type: self.name.clone(),
                    property: p.name.clone(),
                });
            }
            if !seen.insert(p.name.as_str()) {
                return Err(NodeError::DuplicateRegistration(format!(
                    "property '{}' on '{}'",
                    p.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Registry of node types, addressable by name and by folder name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    by_name: HashMap<String, Arc<NodeType>>,
    by_folder: HashMap<String, Arc<NodeType>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type; names and folders must be unique.
    pub fn register(&mut self, node_type: NodeType) -> Result<Arc<NodeType>, NodeError> {
        node_type.validate()?;
        if self.by_name.contains_key(node_type.name()) {
            return Err(NodeError::DuplicateRegistration(format!(
                "type '{}'",
                node_type.name()
            )));
        }
        if self.by_folder.contains_key(node_type.folder_name()) {
            return Err(NodeError::DuplicateRegistration(format!(
                "folder '{}'",
                node_type.folder_name()
            )));
        }
        let node_type = Arc::new(node_type);
        self.by_name
            .insert(node_type.name().to_string(), Arc::clone(&node_type));
        self.by_folder
            .insert(node_type.folder_name().to_string(), Arc::clone(&node_type));
        Ok(node_type)
    }

    /// Builder-style registration.
    pub fn with_type(mut self, node_type: NodeType) -> Result<Self, NodeError> {
        self.register(node_type)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<Arc<NodeType>, NodeError> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| NodeError::UnknownType(name.to_string()))
    }

    pub fn by_folder(&self, folder_name: &str) -> Option<Arc<NodeType>> {
        self.by_folder.get(folder_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_comparers() {
        assert!(ValueComparer::Exact.equals(&json!({"a": 1}), &json!({"a": 1})));
        assert!(!ValueComparer::Exact.equals(&json!("A"), &json!("a")));
        assert!(ValueComparer::CaseInsensitive.equals(&json!("Name"), &json!("nAME")));
        assert!(ValueComparer::Unordered.equals(&json!([1, 2, 2]), &json!([2, 1, 2])));
        assert!(!ValueComparer::Unordered.equals(&json!([1, 1, 2]), &json!([1, 2, 2])));
    }

    #[test]
    fn test_register_and_lookup() {
        let schema = Schema::new()
            .with_type(
                NodeType::new("Application", "Applications")
                    .with_property(PropertyDescriptor::value("title")),
            )
            .unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema.get("Application").unwrap().folder_name(), "Applications");
        assert!(schema.by_folder("Applications").is_some());
        assert!(matches!(schema.get("Nope"), Err(NodeError::UnknownType(_))));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut schema = Schema::new();
        schema.register(NodeType::new("A", "As")).unwrap();
        assert!(schema.register(NodeType::new("A", "Others")).is_err());
        assert!(schema.register(NodeType::new("B", "As")).is_err());
    }

    #[test]
    fn test_reserved_property_rejected() {
        let mut schema = Schema::new();
        let result = schema.register(
            NodeType::new("A", "As").with_property(PropertyDescriptor::value("id")),
        );
        assert!(matches!(result, Err(NodeError::UnknownProperty { .. })));
    }
}
