//! Conversion between nodes and their stored payloads.
//!
//! The path of a node is never written into its payload; it is derived from
//! where the data file sits and handed back to [`NodeSerializer::deserialize`].
//! Reference checks go through the resolver passed to each call.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::SerializationError;
use crate::node::{Node, NodePath, PropertyKind, ReferenceResolver, Schema, UniqueId};

const TYPE_KEY: &str = "$type";
const ID_KEY: &str = "id";

/// Encodes nodes to bytes and back.
pub trait NodeSerializer {
    fn serialize(&self, node: &Node) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        bytes: &[u8],
        path: &NodePath,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Node, SerializationError>;
}

/// JSON payloads of the form `{"$type": ..., "id": ..., <properties>}`.
#[derive(Debug, Clone)]
pub struct JsonSerializer {
    schema: Arc<Schema>,
    pretty: bool,
    verify_references: bool,
}

impl JsonSerializer {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            pretty: true,
            verify_references: false,
        }
    }

    /// Write indented JSON (default) or compact JSON.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Fail deserialization when a reference targets a missing node.
    pub fn verify_references(mut self, verify: bool) -> Self {
        self.verify_references = verify;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl NodeSerializer for JsonSerializer {
    fn serialize(&self, node: &Node) -> Result<Vec<u8>, SerializationError> {
        let mut object = Map::new();
        object.insert(TYPE_KEY.into(), Value::String(node.type_name().to_string()));
        object.insert(ID_KEY.into(), Value::String(node.id().to_string()));
        for (name, value) in node.values() {
            object.insert(name.clone(), value.clone());
        }
        let value = Value::Object(object);
        let mut bytes = if self.pretty {
            serde_json::to_vec_pretty(&value)?
        } else {
            serde_json::to_vec(&value)?
        };
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn deserialize(
        &self,
        bytes: &[u8],
        path: &NodePath,
        resolver: &dyn ReferenceResolver,
    ) -> Result<Node, SerializationError> {
        let malformed = |detail: String| SerializationError::Malformed {
            path: path.to_string(),
            detail,
        };

        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(malformed("payload is not a JSON object".into()));
        };

        let type_name = match object.remove(TYPE_KEY) {
            Some(Value::String(name)) => name,
            _ => return Err(SerializationError::MissingType(path.to_string())),
        };
        let node_type = self.schema.get(&type_name)?;

        let id = match object.remove(ID_KEY) {
            Some(Value::String(id)) => id,
            _ => return Err(malformed("missing string id".into())),
        };
        if id != path.id() {
            return Err(SerializationError::IdMismatch {
                path: path.to_string(),
                expected: path.id().to_string(),
                found: id,
            });
        }

        let mut node = Node::new(Arc::clone(&node_type), UniqueId::parse(id)?)
            .with_path(path.clone())?;
        for (name, value) in object {
            if node_type.property(&name).is_some() {
                node.set(&name, value)?;
            } else {
                debug!(path = %path, property = %name, "ignoring undeclared property");
            }
        }

        if self.verify_references {
            for descriptor in node_type.properties() {
                if descriptor.kind == PropertyKind::Value {
                    continue;
                }
                for target in node.references(&descriptor.name)? {
                    if !resolver.exists(&target)? {
                        return Err(SerializationError::DanglingReference {
                            path: path.to_string(),
                            property: descriptor.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        Ok(node)
    }
}
