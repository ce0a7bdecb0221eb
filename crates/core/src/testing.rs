//! Shared fixtures for unit tests.

use std::sync::Arc;

use git2::{Signature, Time};
use serde_json::json;
use tempfile::TempDir;

use crate::errors::SerializationError;
use crate::node::{
    Node, NodePath, NodeType, PropertyDescriptor, ReferenceResolver, Schema, UniqueId,
    ValueComparer,
};
use crate::serializer::JsonSerializer;
use crate::store::NodeStore;

/// Applications contain Tables, which contain Fields.
pub(crate) fn schema() -> Arc<Schema> {
    let schema = Schema::new()
        .with_type(
            NodeType::new("Application", "Applications")
                .with_property(PropertyDescriptor::value("title"))
                .with_property(PropertyDescriptor::value("description"))
                .with_property(PropertyDescriptor::reference("owner"))
                .with_property(
                    PropertyDescriptor::value("tags").with_comparer(ValueComparer::Unordered),
                ),
        )
        .and_then(|s| {
            s.with_type(
                NodeType::new("Table", "Tables")
                    .with_property(PropertyDescriptor::value("name"))
                    .with_property(
                        PropertyDescriptor::value("label")
                            .with_comparer(ValueComparer::CaseInsensitive),
                    ),
            )
        })
        .and_then(|s| {
            s.with_type(
                NodeType::new("Field", "Fields")
                    .with_property(PropertyDescriptor::value("name"))
                    .with_property(PropertyDescriptor::value("data_type")),
            )
        })
        .unwrap();
    Arc::new(schema)
}

/// Application node at `Applications/<id>`.
pub(crate) fn app_node(id: &str, title: &str) -> Node {
    let id = UniqueId::parse(id).unwrap();
    let path = NodePath::root("Applications", &id).unwrap();
    Node::new(schema().get("Application").unwrap(), id)
        .with_path(path)
        .unwrap()
        .with("title", json!(title))
        .unwrap()
}

/// Table node at `Applications/<app>/Tables/<id>`.
pub(crate) fn table_node(app: &str, id: &str, name: &str) -> Node {
    let parent = NodePath::parse(&format!("Applications/{}", app)).unwrap();
    let id = UniqueId::parse(id).unwrap();
    let path = parent.child("Tables", &id).unwrap();
    Node::new(schema().get("Table").unwrap(), id)
        .with_path(path)
        .unwrap()
        .with("name", json!(name))
        .unwrap()
}

/// Field node at `Applications/<app>/Tables/<table>/Fields/<id>`.
pub(crate) fn field_node(app: &str, table: &str, id: &str, name: &str) -> Node {
    let parent = NodePath::parse(&format!("Applications/{}/Tables/{}", app, table)).unwrap();
    let id = UniqueId::parse(id).unwrap();
    let path = parent.child("Fields", &id).unwrap();
    Node::new(schema().get("Field").unwrap(), id)
        .with_path(path)
        .unwrap()
        .with("name", json!(name))
        .unwrap()
}

pub(crate) fn path(folder_path: &str) -> NodePath {
    NodePath::parse(folder_path).unwrap()
}

pub(crate) fn signature() -> Signature<'static> {
    Signature::new("Test", "test@test.com", &Time::new(1_700_000_000, 0)).unwrap()
}

/// Empty bare node repository in a temp dir; keep the `TempDir` alive.
pub(crate) fn temp_store() -> (TempDir, NodeStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = NodeStore::init_bare(dir.path(), JsonSerializer::new(schema())).unwrap();
    (dir, store)
}

/// Resolver for payloads decoded outside any snapshot.
pub(crate) struct NoReferences;

impl ReferenceResolver for NoReferences {
    fn exists(&self, _path: &NodePath) -> Result<bool, SerializationError> {
        Ok(false)
    }

    fn resolve(&self, _path: &NodePath) -> Result<Option<Arc<Node>>, SerializationError> {
        Ok(None)
    }
}
