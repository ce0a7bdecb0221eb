//! Combines two change sets that share an ancestor into merge decisions.
//!
//! Decisions are produced lazily, one per change on "their" side. Local
//! changes are indexed up front so each lookup is by path.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::node_merge::NodeMergeChange;
use super::resolver::{AddedUnderDeletedPolicy, MergeMode, MergePolicy};
use crate::diff::{ChangeStatus, NodeChange, NodeChanges};
use crate::errors::MergeError;
use crate::node::{Node, NodePath};

static NULL: Value = Value::Null;

/// Merge `theirs` into `local`; both diffs start at the same ancestor.
pub fn collect_changes<'a>(
    local: &'a NodeChanges,
    theirs: &'a NodeChanges,
    policy: &'a MergePolicy,
    mode: MergeMode,
) -> MergeChanges<'a> {
    info!(
        local = local.len(),
        theirs = theirs.len(),
        ?mode,
        "collecting merge changes"
    );
    MergeChanges {
        local: ChangeIndex::new(local),
        their_deleted: deleted_by_depth(theirs),
        pending: theirs.iter(),
        policy,
        mode,
    }
}

/// Lazy sequence of merge decisions; see [`collect_changes`].
pub struct MergeChanges<'a> {
    local: ChangeIndex<'a>,
    their_deleted: Vec<&'a NodePath>,
    pending: std::slice::Iter<'a, NodeChange>,
    policy: &'a MergePolicy,
    mode: MergeMode,
}

impl Iterator for MergeChanges<'_> {
    type Item = Result<NodeMergeChange, MergeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(change) = self.pending.next() {
            if change.is_noop() {
                debug!(path = %change.path(), "skipping edit with no differences");
                continue;
            }
            match self.merge(change) {
                Ok(Some(merged)) => return Some(Ok(merged)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

impl MergeChanges<'_> {
    fn merge(&self, theirs: &NodeChange) -> Result<Option<NodeMergeChange>, MergeError> {
        let path = theirs.path();
        let builder = NodeMergeChange::builder();
        let builder = match theirs.status() {
            ChangeStatus::Edit => {
                let ancestor = theirs.old().cloned();
                let ours = match self.local.modified.get(path) {
                    Some(local) => local.new_node().cloned(),
                    None if self.local.deleted.contains_key(path) => None,
                    None => ancestor.clone(),
                };
                builder
                    .ancestor(ancestor)
                    .ours(ours)
                    .theirs(theirs.new_node().cloned())
                    .our_root_deleted_parent(self.local.deleted_root(path, true))
            }
            ChangeStatus::Add => {
                let ours = self
                    .local
                    .added
                    .get(path)
                    .and_then(|local| local.new_node().cloned());
                builder
                    .ours(ours)
                    .theirs(theirs.new_node().cloned())
                    .our_root_deleted_parent(self.local.deleted_root(path, false))
            }
            ChangeStatus::Delete => {
                let ancestor = theirs.old().cloned();
                let (ours, their_root) = match self.local.modified.get(path) {
                    Some(local) => (local.new_node().cloned(), self.their_deleted_root(path)),
                    None if self.local.deleted.contains_key(path) => (None, None),
                    None => (ancestor.clone(), None),
                };
                let orphans = self.local.added_under(path);
                if let Some(added) = orphans.first() {
                    if self.policy.added_under_deleted() == AddedUnderDeletedPolicy::Reject {
                        return Err(MergeError::AddedUnderDeletedAncestor {
                            deleted: path.to_string(),
                            added: added.to_string(),
                        });
                    }
                }
                builder
                    .ancestor(ancestor)
                    .ours(ours)
                    .their_root_deleted_parent(their_root)
                    .orphaned_additions(orphans)
            }
        };

        let change = builder.build(self.policy)?;
        if self.mode == MergeMode::Rebase && self.already_applied(&change) {
            debug!(path = %change.path(), status = %change.status(), "already applied upstream");
            return Ok(None);
        }
        debug!(path = %change.path(), status = %change.status(), "merge decision");
        Ok(Some(change))
    }

    /// Outcome the local side already has; only conflict-free decisions qualify.
    fn already_applied(&self, change: &NodeMergeChange) -> bool {
        use super::node_merge::MergeChangeStatus as S;
        match (change.status(), change.ours()) {
            (S::Delete, None) => true,
            (S::Add | S::Edit, Some(ours)) => same_declared_values(change.merged(), ours),
            _ => false,
        }
    }

    /// Closest deletion on their side that is `path` or contains it; same
    /// tie-break as [`ChangeIndex::deleted_root`].
    fn their_deleted_root(&self, path: &NodePath) -> Option<NodePath> {
        self.their_deleted
            .iter()
            .rev()
            .find(|deleted| deleted.contains(path))
            .map(|deleted| (*deleted).clone())
    }
}

/// Local changes keyed by path.
struct ChangeIndex<'a> {
    added: HashMap<&'a NodePath, &'a NodeChange>,
    modified: HashMap<&'a NodePath, &'a NodeChange>,
    deleted: HashMap<&'a NodePath, &'a NodeChange>,
    deleted_by_depth: Vec<&'a NodePath>,
}

impl<'a> ChangeIndex<'a> {
    fn new(changes: &'a NodeChanges) -> Self {
        let by_path = |status: ChangeStatus| {
            changes
                .iter()
                .filter(|c| c.status() == status)
                .map(|c| (c.path(), c))
                .collect::<HashMap<_, _>>()
        };
        Self {
            added: by_path(ChangeStatus::Add),
            modified: by_path(ChangeStatus::Edit),
            deleted: by_path(ChangeStatus::Delete),
            deleted_by_depth: deleted_by_depth(changes),
        }
    }

    /// Closest folder our side deleted strictly above `path`. With
    /// `include_self`, falls back to `path` itself when we deleted the node.
    fn deleted_root(&self, path: &NodePath, include_self: bool) -> Option<NodePath> {
        self.deleted_by_depth
            .iter()
            .rev()
            .find(|deleted| deleted.is_ancestor_of(path))
            .map(|deleted| (*deleted).clone())
            .or_else(|| {
                (include_self && self.deleted.contains_key(path)).then(|| path.clone())
            })
    }

    /// Nodes we added somewhere under `path`.
    fn added_under(&self, path: &NodePath) -> Vec<NodePath> {
        let mut orphans: Vec<NodePath> = self
            .added
            .keys()
            .filter(|added| path.is_ancestor_of(added))
            .map(|added| (*added).clone())
            .collect();
        orphans.sort();
        orphans
    }
}

/// Equal on every declared property, ignored ones included.
fn same_declared_values(a: &Node, b: &Node) -> bool {
    a.type_name() == b.type_name()
        && a.node_type().properties().iter().all(|descriptor| {
            descriptor.equals(
                a.get(&descriptor.name).unwrap_or(&NULL),
                b.get(&descriptor.name).unwrap_or(&NULL),
            )
        })
}

/// Deleted paths, shortest folder path first.
fn deleted_by_depth(changes: &NodeChanges) -> Vec<&NodePath> {
    let mut deleted: Vec<&NodePath> = changes.deleted().map(|c| c.path()).collect();
    deleted.sort_by(|a, b| {
        a.folder_path()
            .len()
            .cmp(&b.folder_path().len())
            .then_with(|| a.cmp(b))
    });
    deleted
}

/// Convenience for callers holding nodes rather than diffs.
pub fn merge_nodes(
    ancestor: Option<Arc<Node>>,
    ours: Option<Arc<Node>>,
    theirs: Option<Arc<Node>>,
    policy: &MergePolicy,
) -> Result<NodeMergeChange, MergeError> {
    NodeMergeChange::builder()
        .ancestor(ancestor)
        .ours(ours)
        .theirs(theirs)
        .build(policy)
}
