//! Replaying a branch's commits onto an upstream, one commit at a time.
//!
//! Each replayed commit is merged as its own step: the commit's changes are
//! "theirs", and the changes between the commit's parent and the current
//! rebased head are "ours". Steps that halt on conflicts wait for
//! [`NodeRebase::continue_rebase`]. Rewritten commits are unreachable from any
//! ref until the last step, when the branch moves to the new head.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::engine::collect_changes;
use super::node_merge::NodeMergeChange;
use super::resolver::{MergeMode, MergePolicy};
use super::resolve_refs;
use crate::errors::MergeError;
use crate::store::{branch_ref_name, NodeStore, TreeEdits};

/// Progress of a [`NodeRebase`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebaseStatus {
    NotStarted,
    /// The current step needs resolution.
    Conflicts,
    Complete,
}

impl fmt::Display for RebaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Conflicts => write!(f, "conflicts"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A replayed commit and what it became.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedCommit {
    pub original: Oid,
    /// `None` when the commit had nothing left to apply and was skipped.
    pub rewritten: Option<Oid>,
}

/// Rebases a branch onto an upstream commit.
pub struct NodeRebase<'s> {
    store: &'s NodeStore,
    policy: MergePolicy,
    branch: String,
    branch_tip: Oid,
    upstream_name: String,
    upstream: Oid,
    merge_base: Oid,
    replayed: Vec<Oid>,
    completed: Vec<CompletedCommit>,
    current: Vec<NodeMergeChange>,
    status: RebaseStatus,
}

impl<'s> NodeRebase<'s> {
    /// Resolve the upstream and collect the commits to replay, oldest first.
    pub fn new(
        store: &'s NodeStore,
        branch: &str,
        upstream: Option<&str>,
        policy: MergePolicy,
    ) -> Result<Self, MergeError> {
        let refs = resolve_refs(store, branch, upstream)?;
        let replayed = store.git().commits_between(refs.merge_base, refs.branch_tip)?;
        info!(
            branch,
            upstream = %refs.upstream_name,
            merge_base = %refs.merge_base,
            commits = replayed.len(),
            "rebase prepared"
        );
        Ok(Self {
            store,
            policy,
            branch: branch.to_string(),
            branch_tip: refs.branch_tip,
            upstream_name: refs.upstream_name,
            upstream: refs.upstream,
            merge_base: refs.merge_base,
            replayed,
            completed: Vec::new(),
            current: Vec::new(),
            status: RebaseStatus::NotStarted,
        })
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Branch tip before the rebase.
    pub fn original_tip(&self) -> Oid {
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

    pub fn status(&self) -> RebaseStatus {
        self.status
    }

    /// Commits to replay, oldest first.
    pub fn replayed(&self) -> &[Oid] {
        &self.replayed
    }

    pub fn completed(&self) -> &[CompletedCommit] {
        &self.completed
    }

    /// Commit being replayed while halted on conflicts.
    pub fn current_commit(&self) -> Option<Oid> {
        match self.status {
            RebaseStatus::Conflicts => self.replayed.get(self.completed.len()).copied(),
            _ => None,
        }
    }

    pub fn current_changes(&self) -> &[NodeMergeChange] {
        &self.current
    }

    /// Mutable access for resolving the current step's conflicts.
    pub fn current_changes_mut(&mut self) -> &mut [NodeMergeChange] {
        &mut self.current
    }

    /// Last rewritten commit, or the upstream when nothing was rewritten yet.
    pub fn head(&self) -> Oid {
        self.completed
            .iter()
            .rev()
            .find_map(|c| c.rewritten)
            .unwrap_or(self.upstream)
    }

    /// Replay commits until one conflicts or all are done.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub fn start(&mut self) -> Result<RebaseStatus, MergeError> {
        if self.status != RebaseStatus::NotStarted {
            return Err(self.invalid_state("start rebase"));
        }
        info!(upstream = %self.upstream_name, "rebase started");
        self.continue_next()
    }

    /// Commit the resolved current step and keep replaying.
    #[instrument(skip(self), fields(branch = %self.branch))]
    pub fn continue_rebase(&mut self) -> Result<RebaseStatus, MergeError> {
        if self.status != RebaseStatus::Conflicts {
            return Err(self.invalid_state("continue rebase"));
        }
        self.commit_current()?;
        self.continue_next()
    }

    fn continue_next(&mut self) -> Result<RebaseStatus, MergeError> {
        while let Some(&original) = self.replayed.get(self.completed.len()) {
            let changes = self.step_changes(original)?;
            if changes.is_empty() {
                debug!(commit = %original, "nothing left to apply, skipping");
                self.completed.push(CompletedCommit {
                    original,
                    rewritten: None,
                });
                continue;
            }
            self.current = changes;
            if self.current.iter().any(|c| c.status().is_conflict()) {
                self.status = RebaseStatus::Conflicts;
                info!(
                    commit = %original,
                    step = self.completed.len() + 1,
                    total = self.replayed.len(),
                    "rebase halted on conflicts"
                );
                return Ok(self.status);
            }
            self.commit_current()?;
        }
        self.finish()
    }

    /// Changes the next commit introduces, merged onto the current head.
    fn step_changes(&self, original: Oid) -> Result<Vec<NodeMergeChange>, MergeError> {
        let git = self.store.git();
        let comparison = self.policy.comparison();
        let parent_tree = git.first_parent_tree(original)?;
        let commit_tree = git.commit_tree(original)?;
        let head_tree = git.commit_tree(self.head())?;

        let theirs = self.store.diff(parent_tree, Some(commit_tree), comparison)?;
        let local = self.store.diff(parent_tree, Some(head_tree), comparison)?;
        collect_changes(&local, &theirs, &self.policy, MergeMode::Rebase).collect()
    }

    fn commit_current(&mut self) -> Result<(), MergeError> {
        let original = *self
            .replayed
            .get(self.completed.len())
            .ok_or_else(|| self.invalid_state("commit rebase step"))?;
        let mut edits = TreeEdits::new();
        for change in &self.current {
            change.transform(&mut edits)?;
        }

        let info = self.store.git().commit_info(original)?;
        let author = info.author_signature()?;
        let committer = info.committer_signature()?;
        let rewritten = self.store.write_commit(
            &edits,
            &[self.head()],
            &author,
            &committer,
            &info.message,
            None,
        )?;
        debug!(original = %original, rewritten = %rewritten, "replayed commit");
        self.completed.push(CompletedCommit {
            original,
            rewritten: Some(rewritten),
        });
        self.current.clear();
        Ok(())
    }

    fn finish(&mut self) -> Result<RebaseStatus, MergeError> {
        let head = self.head();
        self.store.git().update_ref(
            &branch_ref_name(&self.branch),
            head,
            &format!("rebase onto {}: finished", self.upstream_name),
        )?;
        self.status = RebaseStatus::Complete;
        info!(
            head = %head,
            replayed = self.completed.iter().filter(|c| c.rewritten.is_some()).count(),
            skipped = self.completed.iter().filter(|c| c.rewritten.is_none()).count(),
            "rebase complete"
        );
        Ok(self.status)
    }

    fn invalid_state(&self, operation: &str) -> MergeError {
        MergeError::InvalidState {
            operation: operation.to_string(),
            state: self.status.to_string(),
        }
    }
}
