//! Git-backed node storage.
//!
//! [`GitStore`] speaks git objects and refs, [`Snapshot`] reads nodes out of
//! one tree, and [`TreeEdits`] collects node writes. [`NodeStore`] ties them
//! together with a serializer so callers deal in nodes rather than blobs.

pub mod client;
pub mod snapshot;
pub mod transform;

use std::path::Path;

use git2::{Oid, Signature};
use tracing::{debug, info, instrument};

use crate::diff::{ComparisonPolicy, NodeChanges, TreeDiffer};
use crate::errors::{DiffError, NodeError, StoreError, TransformError};
use crate::serializer::NodeSerializer;

pub use client::{branch_ref_name, GitCommitInfo, GitStore, TreeDelta, TreeEntryEdit};
pub use snapshot::Snapshot;
pub use transform::{PendingAction, TreeEdits};

/// A node repository: a git store plus the serializer for its data files.
pub struct NodeStore {
    git: GitStore,
    serializer: Box<dyn NodeSerializer>,
}

impl NodeStore {
    pub fn new(git: GitStore, serializer: impl NodeSerializer + 'static) -> Self {
        Self {
            git,
            serializer: Box::new(serializer),
        }
    }

    pub fn open<P: AsRef<Path>>(
        repo_path: P,
        serializer: impl NodeSerializer + 'static,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(GitStore::open(repo_path)?, serializer))
    }

    pub fn init_bare<P: AsRef<Path>>(
        repo_path: P,
        serializer: impl NodeSerializer + 'static,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(GitStore::init_bare(repo_path)?, serializer))
    }

    pub fn git(&self) -> &GitStore {
        &self.git
    }

    pub fn serializer(&self) -> &dyn NodeSerializer {
        self.serializer.as_ref()
    }

    /// Node reader over `tree`; `None` is the empty tree.
    pub fn snapshot(&self, tree: Option<Oid>) -> Snapshot<'_> {
        Snapshot::new(&self.git, self.serializer.as_ref(), tree)
    }

    /// Node reader over the tree of `commit`.
    pub fn commit_snapshot(&self, commit: Oid) -> Result<Snapshot<'_>, StoreError> {
        let tree = self.git.commit_tree(commit)?;
        Ok(self.snapshot(Some(tree)))
    }

    /// Node-level changes from `old_tree` to `new_tree`.
    pub fn diff(
        &self,
        old_tree: Option<Oid>,
        new_tree: Option<Oid>,
        policy: &ComparisonPolicy,
    ) -> Result<NodeChanges, DiffError> {
        TreeDiffer::new(self, policy).compare(old_tree, new_tree)
    }

    /// Node-level changes between two commits.
    pub fn diff_commits(
        &self,
        old_commit: Oid,
        new_commit: Oid,
        policy: &ComparisonPolicy,
    ) -> Result<NodeChanges, DiffError> {
        let old_tree = self.git.commit_tree(old_commit)?;
        let new_tree = self.git.commit_tree(new_commit)?;
        self.diff(Some(old_tree), Some(new_tree), policy)
    }

    /// Apply `edits` on top of `base_tree` and write the new tree.
    #[instrument(skip(self, edits), fields(edits = edits.len()))]
    pub fn write_tree(
        &self,
        base_tree: Option<Oid>,
        edits: &TreeEdits,
    ) -> Result<Oid, TransformError> {
        let mut entries = Vec::with_capacity(edits.len());
        for (path, action) in edits.iter() {
            let edit = match action {
                PendingAction::CreateOrUpdate(node) => {
                    if node.path() != Some(path) {
                        return Err(NodeError::InvalidPath {
                            path: path.to_string(),
                            detail: format!("pending node '{}' is not placed here", node.id()),
                        }
                        .into());
                    }
                    let bytes = self.serializer.serialize(node)?;
                    TreeEntryEdit::Upsert(self.git.create_blob(&bytes)?)
                }
                PendingAction::Delete => TreeEntryEdit::Remove,
            };
            debug!(path = %path, ?edit, "pending tree edit");
            entries.push((path.data_path(), edit));
        }
        Ok(self.git.create_tree(base_tree, &entries)?)
    }

    /// Write a commit whose tree is the first parent's tree plus `edits`.
    #[allow(clippy::too_many_arguments)]
    pub fn write_commit(
        &self,
        edits: &TreeEdits,
        parents: &[Oid],
        author: &Signature<'_>,
        committer: &Signature<'_>,
        message: &str,
        update_ref: Option<&str>,
    ) -> Result<Oid, TransformError> {
        let base_tree = match parents.first() {
            Some(parent) => Some(self.git.commit_tree(*parent)?),
            None => None,
        };
        let tree = self.write_tree(base_tree, edits)?;
        Ok(self
            .git
            .create_commit(author, committer, message, tree, parents, update_ref)?)
    }

    /// Commit `edits` on top of `branch`, creating the branch if needed.
    pub fn commit(
        &self,
        branch: &str,
        edits: &TreeEdits,
        author: &Signature<'_>,
        committer: &Signature<'_>,
        message: &str,
    ) -> Result<Oid, TransformError> {
        let parents: Vec<Oid> = self.git.try_branch_tip(branch)?.into_iter().collect();
        let ref_name = branch_ref_name(branch);
        let oid = self.write_commit(
            edits,
            &parents,
            author,
            committer,
            message,
            Some(&ref_name),
        )?;
        info!(branch, sha = %oid, nodes = edits.len(), "committed node edits");
        Ok(oid)
    }
}
