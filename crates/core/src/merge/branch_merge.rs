//! Merging an upstream into a branch as a single step.

use std::fmt;

use git2::{Oid, Signature};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::engine::collect_changes;
use super::node_merge::NodeMergeChange;
use super::resolver::{MergeMode, MergePolicy};
use super::resolve_refs;
use crate::errors::MergeError;
use crate::store::{branch_ref_name, NodeStore, TreeEdits};

/// Progress of a [`NodeMerge`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    NotStarted,
    /// Nothing to merge.
    UpToDate,
    /// Some changes need resolution before committing.
    Conflicts,
    /// The branch has no commits of its own; it can move to the upstream.
    FastForward,
    /// Both sides diverged; committing writes a merge commit.
    NonFastForward,
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::UpToDate => write!(f, "up to date"),
            Self::Conflicts => write!(f, "conflicts"),
            Self::FastForward => write!(f, "fast-forward"),
            Self::NonFastForward => write!(f, "non-fast-forward"),
        }
    }
}

/// Merges an upstream commit into a branch.
pub struct NodeMerge<'s> {
    store: &'s NodeStore,
    policy: MergePolicy,
    branch: String,
    branch_tip: Oid,
    upstream_name: String,
    upstream: Oid,
    merge_base: Oid,
    requires_merge_commit: bool,
    changes: Vec<NodeMergeChange>,
    status: MergeStatus,
    committed: bool,
}

impl<'s> NodeMerge<'s> {
    /// Resolve `upstream` (or the branch's configured upstream) and the
    /// merge base.
    pub fn new(
        store: &'s NodeStore,
        branch: &str,
        upstream: Option<&str>,
        policy: MergePolicy,
    ) -> Result<Self, MergeError> {
        let refs = resolve_refs(store, branch, upstream)?;
        let requires_merge_commit = refs.branch_tip != refs.merge_base;
        info!(
            branch,
            upstream = %refs.upstream_name,
            merge_base = %refs.merge_base,
            requires_merge_commit,
            "merge prepared"
        );
        Ok(Self {
            store,
            policy,
            branch: branch.to_string(),
            branch_tip: refs.branch_tip,
            upstream_name: refs.upstream_name,
            upstream: refs.upstream,
            merge_base: refs.merge_base,
            requires_merge_commit,
            changes: Vec::new(),
            status: MergeStatus::NotStarted,
            committed: false,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn branch_tip(&self) -> Oid {
        self.branch_tip
    }

    pub fn upstream(&self) -> Oid {
        self.upstream
    }

    pub fn upstream_name(&self) -> &str {
        &self.upstream_name
    }

    pub fn merge_base(&self) -> Oid {
        self.merge_base
    }

    pub fn requires_merge_commit(&self) -> bool {
        self.requires_merge_commit
    }

    pub fn status(&self) -> MergeStatus {
        self.status
    }

    pub fn changes(&self) -> &[NodeMergeChange] {
        &self.changes
    }

    /// Mutable access for resolving conflicts before [`commit`](Self::commit).
    pub fn changes_mut(&mut self) -> &mut [NodeMergeChange] {
        &mut self.changes
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &NodeMergeChange> {
        self.changes.iter().filter(|c| c.status().is_conflict())
    }

    /// Diff both sides from the merge base and compute merge decisions.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub fn start(&mut self) -> Result<MergeStatus, MergeError> {
        if self.status != MergeStatus::NotStarted {
            return Err(MergeError::InvalidState {
                operation: "start merge".into(),
                state: self.status.to_string(),
            });
        }
        let comparison = self.policy.comparison();
        let local = self
            .store
            .diff_commits(self.merge_base, self.branch_tip, comparison)?;
        let theirs = self
            .store
            .diff_commits(self.merge_base, self.upstream, comparison)?;
        self.changes = collect_changes(&local, &theirs, &self.policy, MergeMode::Merge)
            .collect::<Result<Vec<_>, _>>()?;

        self.status = if self.conflicts().next().is_some() {
            MergeStatus::Conflicts
        } else if !self.requires_merge_commit && self.upstream != self.branch_tip {
            MergeStatus::FastForward
        } else if self.upstream == self.merge_base {
            MergeStatus::UpToDate
        } else {
            MergeStatus::NonFastForward
        };
        info!(
            status = %self.status,
            changes = self.changes.len(),
            conflicts = self.conflicts().count(),
            "merge started"
        );
        Ok(self.status)
    }

    /// Write the merge result and move the branch. Returns the new tip.
    #[instrument(skip(self, author, committer), fields(branch = %self.branch))]
    pub fn commit(
        &mut self,
        author: &Signature<'_>,
        committer: &Signature<'_>,
    ) -> Result<Oid, MergeError> {
        if self.committed {
            return Err(MergeError::AlreadyCommitted(self.branch.clone()));
        }
        if self.status == MergeStatus::NotStarted {
            return Err(MergeError::InvalidState {
                operation: "commit merge".into(),
                state: self.status.to_string(),
            });
        }
        if let Some(conflicted) = self.conflicts().next() {
            return Err(MergeError::UnresolvedConflicts(conflicted.path().to_string()));
        }

        let ref_name = branch_ref_name(&self.branch);
        let tip = if !self.requires_merge_commit {
            if self.upstream != self.branch_tip {
                self.store.git().update_ref(
                    &ref_name,
                    self.upstream,
                    &format!("merge {}: fast-forward", self.upstream_name),
                )?;
            }
            self.status = if self.upstream == self.branch_tip {
                MergeStatus::UpToDate
            } else {
                MergeStatus::FastForward
            };
            self.upstream
        } else if self.upstream == self.merge_base {
            self.status = MergeStatus::UpToDate;
            self.branch_tip
        } else {
            let mut edits = TreeEdits::new();
            for change in &self.changes {
                change.transform(&mut edits)?;
            }
            let message = format!("Merge {} into {}", self.upstream_name, self.branch);
            let oid = self.store.write_commit(
                &edits,
                &[self.branch_tip, self.upstream],
                author,
                committer,
                &message,
                Some(&ref_name),
            )?;
            self.status = MergeStatus::NonFastForward;
            oid
        };
        self.committed = true;
        info!(status = %self.status, tip = %tip, "merge committed");
        Ok(tip)
    }
}
