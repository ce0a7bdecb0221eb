//! Pending node writes collected before a tree is built.

use std::collections::BTreeMap;

use crate::errors::NodeError;
use crate::node::{Node, NodePath};

/// What happens to a node path in the next tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    CreateOrUpdate(Node),
    Delete,
}

/// Ordered set of pending node writes; the last action per path wins.
#[derive(Debug, Clone, Default)]
pub struct TreeEdits {
    actions: BTreeMap<NodePath, PendingAction>,
}

impl TreeEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node, assigning a path on first insertion.
    ///
    /// Path-less nodes are placed under `parent` (or at the root) in their
    /// type's folder. Nodes that already have a path must agree with it.
    pub fn create_or_update(
        &mut self,
        mut node: Node,
        parent: Option<&NodePath>,
    ) -> Result<NodePath, NodeError> {
        let folder = node.node_type().folder_name().to_string();
        let expected = match parent {
            Some(parent) => parent.child(&folder, node.id())?,
            None => NodePath::root(&folder, node.id())?,
        };
        let path = match node.path() {
            Some(existing) if parent.is_none() => existing.clone(),
            _ => {
                node.set_path(expected.clone())?;
                expected
            }
        };
        self.actions
            .insert(path.clone(), PendingAction::CreateOrUpdate(node));
        Ok(path)
    }

    /// Write a node at the path it already carries.
    pub fn upsert(&mut self, node: Node) -> Result<NodePath, NodeError> {
        let path = node.path().cloned().ok_or_else(|| NodeError::InvalidPath {
            path: node.id().to_string(),
            detail: "node has no path".into(),
        })?;
        self.actions
            .insert(path.clone(), PendingAction::CreateOrUpdate(node));
        Ok(path)
    }

    /// Remove the node data file at `path`.
    pub fn delete(&mut self, path: NodePath) {
        self.actions.insert(path, PendingAction::Delete);
    }

    pub fn get(&self, path: &NodePath) -> Option<&PendingAction> {
        self.actions.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodePath, &PendingAction)> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
