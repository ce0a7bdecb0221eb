//! Node-level change sets between two trees.
//!
//! A [`NodeChange`] is one node path that was added, edited or deleted
//! between two snapshots. [`TreeDiffer`] produces them; [`ComparisonPolicy`]
//! decides which properties count as changed.

pub mod comparer;
pub mod differ;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodePath};

pub use comparer::{ComparisonPolicy, FieldDifference};
pub use differ::TreeDiffer;

/// How a node path changed between two snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Add,
    Edit,
    Delete,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Edit => write!(f, "edit"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single node transition. `Add` has only a new node, `Delete` only an
/// old one, `Edit` both.
#[derive(Debug, Clone)]
pub struct NodeChange {
    status: ChangeStatus,
    path: NodePath,
    old: Option<Arc<Node>>,
    new: Option<Arc<Node>>,
    differences: Vec<FieldDifference>,
}

impl NodeChange {
    pub fn added(path: NodePath, new: Arc<Node>) -> Self {
        Self {
            status: ChangeStatus::Add,
            path,
            old: None,
            new: Some(new),
            differences: Vec::new(),
        }
    }

    pub fn deleted(path: NodePath, old: Arc<Node>) -> Self {
        Self {
            status: ChangeStatus::Delete,
            path,
            old: Some(old),
            new: None,
            differences: Vec::new(),
        }
    }

    pub fn modified(
        path: NodePath,
        old: Arc<Node>,
        new: Arc<Node>,
        differences: Vec<FieldDifference>,
    ) -> Self {
        Self {
            status: ChangeStatus::Edit,
            path,
            old: Some(old),
            new: Some(new),
            differences,
        }
    }

    pub fn status(&self) -> ChangeStatus {
        self.status
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn old(&self) -> Option<&Arc<Node>> {
        self.old.as_ref()
    }

    pub fn new_node(&self) -> Option<&Arc<Node>> {
        self.new.as_ref()
    }

    /// The most recent version: new for Add/Edit, old for Delete.
    pub fn node(&self) -> Option<&Arc<Node>> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Changed properties; empty for Add/Delete and for no-op edits.
    pub fn differences(&self) -> &[FieldDifference] {
        &self.differences
    }

    /// An edit whose payload changed but none of its compared properties did.
    pub fn is_noop(&self) -> bool {
        self.status == ChangeStatus::Edit && self.differences.is_empty()
    }
}

/// Changes in the order the content store enumerated them.
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    changes: Vec<NodeChange>,
}

impl NodeChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: NodeChange) {
        self.changes.push(change);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeChange> {
        self.changes.iter()
    }

    pub fn added(&self) -> impl Iterator<Item = &NodeChange> {
        self.with_status(ChangeStatus::Add)
    }

    pub fn modified(&self) -> impl Iterator<Item = &NodeChange> {
        self.with_status(ChangeStatus::Edit)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &NodeChange> {
        self.with_status(ChangeStatus::Delete)
    }

    pub fn get(&self, path: &NodePath) -> Option<&NodeChange> {
        self.changes.iter().find(|c| &c.path == path)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn with_status(&self, status: ChangeStatus) -> impl Iterator<Item = &NodeChange> {
        self.changes.iter().filter(move |c| c.status == status)
    }
}

impl FromIterator<NodeChange> for NodeChanges {
    fn from_iter<I: IntoIterator<Item = NodeChange>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for NodeChanges {
    type Item = NodeChange;
    type IntoIter = std::vec::IntoIter<NodeChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

impl<'a> IntoIterator for &'a NodeChanges {
    type Item = &'a NodeChange;
    type IntoIter = std::slice::Iter<'a, NodeChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_node, path};
    use serde_json::json;

    #[test]
    fn test_filtered_views() {
        let a = Arc::new(app_node("a", "A"));
        let b = Arc::new(app_node("b", "B"));
        let b2 = Arc::new(app_node("b", "B2"));
        let c = Arc::new(app_node("c", "C"));
        let changes: NodeChanges = vec![
            NodeChange::added(path("Applications/a"), a),
            NodeChange::modified(
                path("Applications/b"),
                b,
                b2,
                vec![FieldDifference {
                    property: "title".into(),
                    old: json!("B"),
                    new: json!("B2"),
                }],
            ),
            NodeChange::deleted(path("Applications/c"), c),
        ]
        .into_iter()
        .collect();

        assert_eq!(changes.len(), 3);
        assert_eq!(changes.added().count(), 1);
        assert_eq!(changes.modified().count(), 1);
        assert_eq!(changes.deleted().count(), 1);
        let edit = changes.get(&path("Applications/b")).unwrap();
        assert_eq!(edit.status(), ChangeStatus::Edit);
        assert!(!edit.is_noop());
        assert_eq!(edit.node().unwrap().get("title"), Some(&json!("B2")));
    }

    #[test]
    fn test_shape_invariants() {
        let node = Arc::new(app_node("a", "A"));
        let added = NodeChange::added(path("Applications/a"), Arc::clone(&node));
        assert!(added.old().is_none() && added.new_node().is_some());
        let deleted = NodeChange::deleted(path("Applications/a"), Arc::clone(&node));
        assert!(deleted.old().is_some() && deleted.new_node().is_none());
        assert_eq!(deleted.node(), Some(&node));
        let noop = NodeChange::modified(path("Applications/a"), Arc::clone(&node), node, vec![]);
        assert!(noop.is_noop());
    }
}
