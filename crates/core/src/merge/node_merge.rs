//! Three-way merge of a single node.
//!
//! A [`NodeMergeChange`] is built from up to three versions of one node
//! (common ancestor, ours, theirs). Building it runs the per-property merge:
//! properties that merge cleanly are written straight into the merged node,
//! the rest become [`ValueConflict`]s. The status is re-derived every time a
//! conflict is resolved.
//!
//! | ancestor | ours | theirs | status                           |
//! |----------|------|--------|----------------------------------|
//! | -        | any  | any    | Add (unless both sides present)  |
//! | present  | -    | any    | Delete                           |
//! | present  | any  | -      | Delete                           |
//! | present  | yes  | yes    | Edit / EditConflict              |
//!
//! A deleted ancestor folder on either side overrides all of the above with
//! `TreeConflict` until the caller picks a [`TreeResolution`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::resolver::{MergePolicy, Resolution, TreeResolution};
use crate::errors::{MergeError, NodeError};
use crate::node::{Node, NodePath, PropertyDescriptor};
use crate::store::TreeEdits;

/// Outcome of merging one node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MergeChangeStatus {
    Add,
    Edit,
    Delete,
    /// At least one property conflict is unresolved.
    EditConflict,
    /// A deletion on one side collides with changes on the other.
    TreeConflict,
}

impl MergeChangeStatus {
    pub fn is_conflict(self) -> bool {
        matches!(self, Self::EditConflict | Self::TreeConflict)
    }
}

impl fmt::Display for MergeChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Edit => write!(f, "edit"),
            Self::Delete => write!(f, "delete"),
            Self::EditConflict => write!(f, "edit_conflict"),
            Self::TreeConflict => write!(f, "tree_conflict"),
        }
    }
}

/// A property both sides changed differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueConflict {
    property: String,
    ancestor: Option<Value>,
    ours: Value,
    theirs: Value,
    resolved: Option<Value>,
}

impl ValueConflict {
    pub fn new(
        property: impl Into<String>,
        ancestor: Option<Value>,
        ours: Value,
        theirs: Value,
    ) -> Self {
        Self {
            property: property.into(),
            ancestor,
            ours,
            theirs,
            resolved: None,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    /// `None` when the node has no common ancestor.
    pub fn ancestor(&self) -> Option<&Value> {
        self.ancestor.as_ref()
    }

    pub fn ours(&self) -> &Value {
        &self.ours
    }

    pub fn theirs(&self) -> &Value {
        &self.theirs
    }

    /// Value written on resolution; set at most once.
    pub fn resolved(&self) -> Option<&Value> {
        self.resolved.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

/// Staged construction of a [`NodeMergeChange`].
#[derive(Debug, Default)]
pub struct NodeMergeChangeBuilder {
    ancestor: Option<Arc<Node>>,
    ours: Option<Arc<Node>>,
    theirs: Option<Arc<Node>>,
    our_root_deleted_parent: Option<NodePath>,
    their_root_deleted_parent: Option<NodePath>,
    orphaned_additions: Vec<NodePath>,
}

impl NodeMergeChangeBuilder {
    pub fn ancestor(mut self, node: Option<Arc<Node>>) -> Self {
        self.ancestor = node;
        self
    }

    pub fn ours(mut self, node: Option<Arc<Node>>) -> Self {
        self.ours = node;
        self
    }

    pub fn theirs(mut self, node: Option<Arc<Node>>) -> Self {
        self.theirs = node;
        self
    }

    /// Folder our side deleted above (or at) the node.
    pub fn our_root_deleted_parent(mut self, path: Option<NodePath>) -> Self {
        self.our_root_deleted_parent = path;
        self
    }

    /// Folder their side deleted above (or at) a node we changed.
    pub fn their_root_deleted_parent(mut self, path: Option<NodePath>) -> Self {
        self.their_root_deleted_parent = path;
        self
    }

    /// Nodes our side added under the node their side deleted.
    pub fn orphaned_additions(mut self, paths: Vec<NodePath>) -> Self {
        self.orphaned_additions = paths;
        self
    }

    /// Run the per-property merge and derive the initial status.
    pub fn build(self, policy: &MergePolicy) -> Result<NodeMergeChange, MergeError> {
        let template = self
            .ancestor
            .as_ref()
            .or(self.ours.as_ref())
            .or(self.theirs.as_ref())
            .ok_or(MergeError::AllSnapshotsMissing)?;

        let path = template.path().cloned().ok_or_else(|| {
            MergeError::Node(NodeError::InvalidPath {
                path: template.id().to_string(),
                detail: "merged node has no path".into(),
            })
        })?;
        let mut merged = Node::new(Arc::clone(template.node_type()), template.id().clone())
            .with_path(path.clone())?;

        let compared = policy.comparison().properties(template.node_type());
        let mut conflicts = Vec::new();
        for descriptor in template.node_type().properties() {
            let ignored = !compared.iter().any(|p| p.name == descriptor.name);
            match merge_property(
                descriptor,
                self.ancestor.as_deref(),
                self.ours.as_deref(),
                self.theirs.as_deref(),
            )? {
                PropertyMerge::Clean(value) => merged.set(&descriptor.name, value)?,
                // Ignored properties never conflict: ours wins a divergence.
                PropertyMerge::Conflict(conflict) if ignored => {
                    merged.set(&descriptor.name, conflict.ours().clone())?;
                }
                PropertyMerge::Conflict(conflict) => {
                    match policy.resolver().resolve(&conflict) {
                        Some(resolution) => {
                            let value = resolution.value_for(path.folder_path(), &conflict)?;
                            debug!(
                                path = %path,
                                property = %descriptor.name,
                                "conflict settled by resolver"
                            );
                            merged.set(&descriptor.name, value)?;
                        }
                        None => {
                            let fallback = conflict.ours().clone();
                            merged.set(&descriptor.name, fallback)?;
                            conflicts.push(conflict);
                        }
                    }
                }
            }
        }

        let mut change = NodeMergeChange {
            path,
            ancestor: self.ancestor,
            ours: self.ours,
            theirs: self.theirs,
            our_root_deleted_parent: self.our_root_deleted_parent,
            their_root_deleted_parent: self.their_root_deleted_parent,
            orphaned_additions: self.orphaned_additions,
            merged,
            conflicts,
            tree_resolution: None,
            status: MergeChangeStatus::Edit,
        };
        change.update_status();
        debug!(
            path = %change.path,
            status = %change.status,
            conflicts = change.conflicts.len(),
            "merge change initialized"
        );
        Ok(change)
    }
}

enum PropertyMerge {
    Clean(Value),
    Conflict(ValueConflict),
}

fn merge_property(
    descriptor: &PropertyDescriptor,
    ancestor: Option<&Node>,
    ours: Option<&Node>,
    theirs: Option<&Node>,
) -> Result<PropertyMerge, MergeError> {
    let value = |node: &Node| node.get(&descriptor.name).cloned().unwrap_or(Value::Null);
    match (ancestor, ours, theirs) {
        (ancestor, Some(ours), Some(theirs)) => {
            let (o, t) = (value(ours), value(theirs));
            if descriptor.equals(&o, &t) {
                return Ok(PropertyMerge::Clean(o));
            }
            if let Some(ancestor) = ancestor {
                let a = value(ancestor);
                if descriptor.equals(&a, &o) {
                    return Ok(PropertyMerge::Clean(t));
                }
                if descriptor.equals(&a, &t) {
                    return Ok(PropertyMerge::Clean(o));
                }
            }
            Ok(PropertyMerge::Conflict(ValueConflict::new(
                descriptor.name.clone(),
                ancestor.map(value),
                o,
                t,
            )))
        }
        (_, Some(ours), None) => Ok(PropertyMerge::Clean(value(ours))),
        (_, None, Some(theirs)) => Ok(PropertyMerge::Clean(value(theirs))),
        (Some(ancestor), None, None) => Ok(PropertyMerge::Clean(value(ancestor))),
        (None, None, None) => Err(MergeError::AllSnapshotsMissing),
    }
}

/// Merge decision for one node path.
#[derive(Debug, Clone)]
pub struct NodeMergeChange {
    path: NodePath,
    ancestor: Option<Arc<Node>>,
    ours: Option<Arc<Node>>,
    theirs: Option<Arc<Node>>,
    our_root_deleted_parent: Option<NodePath>,
    their_root_deleted_parent: Option<NodePath>,
    orphaned_additions: Vec<NodePath>,
    merged: Node,
    conflicts: Vec<ValueConflict>,
    tree_resolution: Option<TreeResolution>,
    status: MergeChangeStatus,
}

impl NodeMergeChange {
    pub fn builder() -> NodeMergeChangeBuilder {
        NodeMergeChangeBuilder::default()
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn status(&self) -> MergeChangeStatus {
        self.status
    }

    pub fn ancestor(&self) -> Option<&Arc<Node>> {
        self.ancestor.as_ref()
    }

    pub fn ours(&self) -> Option<&Arc<Node>> {
        self.ours.as_ref()
    }

    pub fn theirs(&self) -> Option<&Arc<Node>> {
        self.theirs.as_ref()
    }

    /// Node as it will be written for Add/Edit outcomes.
    pub fn merged(&self) -> &Node {
        &self.merged
    }

    pub fn our_root_deleted_parent(&self) -> Option<&NodePath> {
        self.our_root_deleted_parent.as_ref()
    }

    pub fn their_root_deleted_parent(&self) -> Option<&NodePath> {
        self.their_root_deleted_parent.as_ref()
    }

    pub fn orphaned_additions(&self) -> &[NodePath] {
        &self.orphaned_additions
    }

    pub fn conflicts(&self) -> &[ValueConflict] {
        &self.conflicts
    }

    pub fn unresolved_conflicts(&self) -> impl Iterator<Item = &ValueConflict> {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    pub fn has_tree_conflict(&self) -> bool {
        self.our_root_deleted_parent.is_some()
            || self.their_root_deleted_parent.is_some()
            || !self.orphaned_additions.is_empty()
    }

    pub fn tree_resolution(&self) -> Option<TreeResolution> {
        self.tree_resolution
    }

    /// Settle the conflict on `property`. Each conflict can be resolved once.
    pub fn resolve(&mut self, property: &str, resolution: Resolution) -> Result<(), MergeError> {
        let path = self.path.folder_path().to_string();
        let conflict = self
            .conflicts
            .iter_mut()
            .find(|c| c.property == property)
            .ok_or_else(|| MergeError::ConflictNotFound {
                path: path.clone(),
                property: property.to_string(),
            })?;
        if conflict.is_resolved() {
            return Err(MergeError::AlreadyResolved {
                path,
                property: property.to_string(),
            });
        }
        let value = resolution.value_for(&path, conflict)?;
        conflict.resolved = Some(value.clone());
        self.merged.set(property, value)?;
        self.update_status();
        debug!(path = %self.path, property, status = %self.status, "conflict resolved");
        Ok(())
    }

    /// Settle every unresolved property conflict the same way.
    pub fn resolve_all(&mut self, resolution: Resolution) -> Result<(), MergeError> {
        let pending: Vec<String> = self
            .unresolved_conflicts()
            .map(|c| c.property.clone())
            .collect();
        for property in pending {
            self.resolve(&property, resolution.clone())?;
        }
        Ok(())
    }

    /// Settle the tree conflict. Write-once.
    pub fn resolve_tree_conflict(&mut self, resolution: TreeResolution) -> Result<(), MergeError> {
        if !self.has_tree_conflict() {
            return Err(MergeError::NoTreeConflict(self.path.to_string()));
        }
        if self.tree_resolution.is_some() {
            return Err(MergeError::TreeConflictAlreadyResolved(self.path.to_string()));
        }
        self.tree_resolution = Some(resolution);
        self.update_status();
        debug!(path = %self.path, ?resolution, status = %self.status, "tree conflict resolved");
        Ok(())
    }

    /// Queue the merged outcome as pending tree writes.
    pub fn transform(&self, edits: &mut TreeEdits) -> Result<(), MergeError> {
        match self.status {
            MergeChangeStatus::EditConflict | MergeChangeStatus::TreeConflict => {
                Err(MergeError::UnresolvedConflicts(self.path.to_string()))
            }
            MergeChangeStatus::Delete => {
                edits.delete(self.path.clone());
                if self.tree_resolution == Some(TreeResolution::AcceptDeletion) {
                    for orphan in &self.orphaned_additions {
                        edits.delete(orphan.clone());
                    }
                }
                Ok(())
            }
            MergeChangeStatus::Add | MergeChangeStatus::Edit => {
                edits.upsert(self.merged.clone())?;
                Ok(())
            }
        }
    }

    fn update_status(&mut self) {
        let unresolved = self.unresolved_conflicts().next().is_some();
        self.status = if self.has_tree_conflict() {
            match self.tree_resolution {
                None => MergeChangeStatus::TreeConflict,
                Some(TreeResolution::AcceptDeletion) => MergeChangeStatus::Delete,
                Some(TreeResolution::KeepNode) if unresolved => MergeChangeStatus::EditConflict,
                Some(TreeResolution::KeepNode) if self.ancestor.is_none() => {
                    MergeChangeStatus::Add
                }
                Some(TreeResolution::KeepNode) => MergeChangeStatus::Edit,
            }
        } else if self.ancestor.is_none() && (self.theirs.is_none() || self.ours.is_none()) {
            MergeChangeStatus::Add
        } else if self.ancestor.is_some() && (self.theirs.is_none() || self.ours.is_none()) {
            MergeChangeStatus::Delete
        } else if unresolved {
            MergeChangeStatus::EditConflict
        } else {
            MergeChangeStatus::Edit
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ComparisonPolicy;
    use crate::merge::ConflictStrategy;
    use crate::store::PendingAction;
    use crate::testing::{app_node, path};
    use serde_json::json;

    fn node(title: &str) -> Option<Arc<Node>> {
        Some(Arc::new(app_node("n", title)))
    }

    #[test]
    fn test_all_missing_is_fatal() {
        let result = NodeMergeChange::builder().build(&MergePolicy::new());
        assert!(matches!(result, Err(MergeError::AllSnapshotsMissing)));
    }

    #[test]
    fn test_added_on_one_side() {
        let change = NodeMergeChange::builder()
            .ours(node("X"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Add);
        assert_eq!(change.merged().get("title"), Some(&json!("X")));
    }

    #[test]
    fn test_only_one_side_changed() {
        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("b"))
            .theirs(node("a"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert_eq!(change.merged().get("title"), Some(&json!("b")));

        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("a"))
            .theirs(node("c"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.merged().get("title"), Some(&json!("c")));
    }

    #[test]
    fn test_same_change_on_both_sides() {
        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("b"))
            .theirs(node("b"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert!(change.conflicts().is_empty());
    }

    #[test]
    fn test_conflict_then_resolve() {
        let mut change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("b"))
            .theirs(node("c"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::EditConflict);
        let conflict = &change.conflicts()[0];
        assert_eq!(conflict.property(), "title");
        assert_eq!(conflict.ancestor(), Some(&json!("a")));
        assert_eq!(conflict.ours(), &json!("b"));
        assert_eq!(conflict.theirs(), &json!("c"));

        let mut edits = TreeEdits::new();
        assert!(matches!(
            change.transform(&mut edits),
            Err(MergeError::UnresolvedConflicts(_))
        ));

        change
            .resolve("title", Resolution::AcceptValue(json!("d")))
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert_eq!(change.merged().get("title"), Some(&json!("d")));

        assert!(matches!(
            change.resolve("title", Resolution::AcceptOurs),
            Err(MergeError::AlreadyResolved { .. })
        ));
        assert!(matches!(
            change.resolve("description", Resolution::AcceptOurs),
            Err(MergeError::ConflictNotFound { .. })
        ));

        change.transform(&mut edits).unwrap();
        match edits.get(&path("Applications/n")) {
            Some(PendingAction::CreateOrUpdate(n)) => assert_eq!(n.get("title"), Some(&json!("d"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolver_settles_during_build() {
        let policy = MergePolicy::new().with_strategy(ConflictStrategy::AcceptTheirs);
        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("b"))
            .theirs(node("c"))
            .build(&policy)
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert!(change.conflicts().is_empty());
        assert_eq!(change.merged().get("title"), Some(&json!("c")));
    }

    #[test]
    fn test_both_added_differently_conflicts() {
        let mut change = NodeMergeChange::builder()
            .ours(node("b"))
            .theirs(node("c"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::EditConflict);
        assert_eq!(change.conflicts()[0].ancestor(), None);
        assert!(change.resolve("title", Resolution::AcceptAncestor).is_err());
        change.resolve_all(Resolution::AcceptTheirs).unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
    }

    #[test]
    fn test_deletion() {
        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("a"))
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Delete);
        let mut edits = TreeEdits::new();
        change.transform(&mut edits).unwrap();
        assert_eq!(edits.get(&path("Applications/n")), Some(&PendingAction::Delete));
    }

    #[test]
    fn test_tree_conflict_resolutions() {
        let build = || {
            NodeMergeChange::builder()
                .ancestor(node("a"))
                .theirs(node("c"))
                .our_root_deleted_parent(Some(path("Applications/n")))
                .build(&MergePolicy::new())
                .unwrap()
        };

        let mut change = build();
        assert_eq!(change.status(), MergeChangeStatus::TreeConflict);
        assert_eq!(change.our_root_deleted_parent(), Some(&path("Applications/n")));
        change.resolve_tree_conflict(TreeResolution::KeepNode).unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert_eq!(change.merged().get("title"), Some(&json!("c")));
        assert!(matches!(
            change.resolve_tree_conflict(TreeResolution::AcceptDeletion),
            Err(MergeError::TreeConflictAlreadyResolved(_))
        ));

        let mut change = build();
        change.resolve_tree_conflict(TreeResolution::AcceptDeletion).unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Delete);
    }

    #[test]
    fn test_no_tree_conflict_to_resolve() {
        let mut change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("a"))
            .theirs(node("b"))
            .build(&MergePolicy::new())
            .unwrap();
        assert!(matches!(
            change.resolve_tree_conflict(TreeResolution::KeepNode),
            Err(MergeError::NoTreeConflict(_))
        ));
    }

    #[test]
    fn test_ignored_property_takes_the_only_changed_side() {
        let policy =
            MergePolicy::new().with_comparison(ComparisonPolicy::new().ignore("description"));
        let described = |title: &str, description: &str| {
            Some(Arc::new(
                app_node("n", title)
                    .with("description", json!(description))
                    .unwrap(),
            ))
        };
        let change = NodeMergeChange::builder()
            .ancestor(described("a", "old"))
            .ours(described("b", "old"))
            .theirs(described("a", "new"))
            .build(&policy)
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert_eq!(change.merged().get("title"), Some(&json!("b")));
        assert_eq!(change.merged().get("description"), Some(&json!("new")));

        let change = NodeMergeChange::builder()
            .ancestor(described("a", "old"))
            .ours(described("a", "mine"))
            .theirs(described("a", "old"))
            .build(&policy)
            .unwrap();
        assert_eq!(change.merged().get("description"), Some(&json!("mine")));
    }

    #[test]
    fn test_ignored_property_keeps_ours() {
        let policy = MergePolicy::new().with_comparison(ComparisonPolicy::new().ignore("title"));
        let change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("b"))
            .theirs(node("c"))
            .build(&policy)
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::Edit);
        assert_eq!(change.merged().get("title"), Some(&json!("b")));
    }

    #[test]
    fn test_accept_deletion_removes_orphans() {
        let mut change = NodeMergeChange::builder()
            .ancestor(node("a"))
            .ours(node("a"))
            .orphaned_additions(vec![path("Applications/n/Tables/t")])
            .build(&MergePolicy::new())
            .unwrap();
        assert_eq!(change.status(), MergeChangeStatus::TreeConflict);
        change.resolve_tree_conflict(TreeResolution::AcceptDeletion).unwrap();
        let mut edits = TreeEdits::new();
        change.transform(&mut edits).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(
            edits.get(&path("Applications/n/Tables/t")),
            Some(&PendingAction::Delete)
        );
    }
}
