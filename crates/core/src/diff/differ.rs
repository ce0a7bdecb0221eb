//! Classifies the path-level diff of two trees into node changes.

use std::sync::Arc;

use git2::{Delta, Oid};
use tracing::{debug, info, warn};

use super::{ComparisonPolicy, NodeChange, NodeChanges};
use crate::errors::{DiffError, StoreError};
use crate::node::path::DATA_FILE_EXTENSION;
use crate::node::{Node, NodePath};
use crate::store::{NodeStore, Snapshot, TreeDelta};

/// Walks two trees of one store and yields node-level changes.
///
/// Read-only. Paths that are not node data files are skipped.
pub struct TreeDiffer<'a> {
    store: &'a NodeStore,
    policy: &'a ComparisonPolicy,
}

impl<'a> TreeDiffer<'a> {
    pub fn new(store: &'a NodeStore, policy: &'a ComparisonPolicy) -> Self {
        Self { store, policy }
    }

    /// Changes from `old_tree` to `new_tree`; `None` is the empty tree.
    pub fn compare(
        &self,
        old_tree: Option<Oid>,
        new_tree: Option<Oid>,
    ) -> Result<NodeChanges, DiffError> {
        let old = self.store.snapshot(old_tree);
        let new = self.store.snapshot(new_tree);
        let deltas = self.store.git().diff(old_tree, new_tree)?;

        let mut changes = NodeChanges::new();
        for delta in &deltas {
            let Some(path) = NodePath::from_data_path(&delta.path) else {
                if delta.path.ends_with(&format!(".{}", DATA_FILE_EXTENSION)) {
                    warn!(path = %delta.path, "skipping data file outside the node layout");
                } else {
                    debug!(path = %delta.path, "skipping non-node path");
                }
                continue;
            };
            let change = match delta.status {
                Delta::Added => {
                    let node = load(&new, &path, delta.new_blob, new_tree)?;
                    NodeChange::added(path, node)
                }
                Delta::Deleted => {
                    let node = load(&old, &path, delta.old_blob, old_tree)?;
                    NodeChange::deleted(path, node)
                }
                Delta::Modified => {
                    let before = load(&old, &path, delta.old_blob, old_tree)?;
                    let after = load(&new, &path, delta.new_blob, new_tree)?;
                    let differences = self.policy.compare(&before, &after)?;
                    NodeChange::modified(path, before, after, differences)
                }
                other => return Err(unsupported(delta, other)),
            };
            debug!(
                path = %change.path(),
                status = %change.status(),
                differences = change.differences().len(),
                "classified node change"
            );
            changes.push(change);
        }

        info!(
            added = changes.added().count(),
            modified = changes.modified().count(),
            deleted = changes.deleted().count(),
            "tree comparison complete"
        );
        Ok(changes)
    }

    /// Changes from `old_tree` to the tip of `branch`.
    pub fn compare_with_branch(
        &self,
        old_tree: Option<Oid>,
        branch: &str,
    ) -> Result<NodeChanges, DiffError> {
        let tip = self.store.git().branch_tip(branch)?;
        let new_tree = self.store.git().commit_tree(tip)?;
        self.compare(old_tree, Some(new_tree))
    }
}

fn load(
    snapshot: &Snapshot<'_>,
    path: &NodePath,
    blob: Option<Oid>,
    tree: Option<Oid>,
) -> Result<Arc<Node>, DiffError> {
    let blob = blob.ok_or_else(|| StoreError::ObjectNotFound {
        tree: tree.map(|t| t.to_string()).unwrap_or_default(),
        path: path.data_path(),
    })?;
    Ok(snapshot.load(path, blob)?)
}

fn unsupported(delta: &TreeDelta, status: Delta) -> DiffError {
    DiffError::UnsupportedChange {
        path: delta.path.clone(),
        kind: format!("{:?}", status),
    }
}
