//! Three-way merge of node change sets, and the merge/rebase orchestrators.
//!
//! The merge subsystem is responsible for:
//! 1. **Per-node merging** -- property-level three-way merge with conflicts.
//! 2. **Collecting** -- pairing local and their changes by path, including
//!    tree conflicts caused by deleted folders.
//! 3. **Orchestration** -- merging an upstream into a branch, or replaying a
//!    branch's commits onto an upstream one at a time.

pub mod branch_merge;
pub mod engine;
pub mod node_merge;
pub mod rebase;
pub mod resolver;

use git2::Oid;

use crate::errors::{MergeError, StoreError};
use crate::store::NodeStore;

pub use branch_merge::{MergeStatus, NodeMerge};
pub use engine::{collect_changes, merge_nodes, MergeChanges};
pub use node_merge::{MergeChangeStatus, NodeMergeChange, NodeMergeChangeBuilder, ValueConflict};
pub use rebase::{CompletedCommit, NodeRebase, RebaseStatus};
pub use resolver::{
    AddedUnderDeletedPolicy, ConflictStrategy, MergeMode, MergePolicy, Resolution,
    TreeResolution, ValueResolver,
};

/// Commits an orchestrator works between.
pub(crate) struct ResolvedRefs {
    pub branch_tip: Oid,
    pub upstream_name: String,
    pub upstream: Oid,
    pub merge_base: Oid,
}

/// Resolve the branch tip, the upstream (explicit or configured) and their
/// merge base.
pub(crate) fn resolve_refs(
    store: &NodeStore,
    branch: &str,
    upstream: Option<&str>,
) -> Result<ResolvedRefs, MergeError> {
    let git = store.git();
    let branch_tip = git.branch_tip(branch).map_err(|e| match e {
        StoreError::RefNotFound(_) => MergeError::BranchNotFound(branch.to_string()),
        other => other.into(),
    })?;
    let (upstream_name, upstream) = match upstream {
        Some(spec) => {
            let oid = git.resolve_commit(spec).map_err(|e| match e {
                StoreError::RefNotFound(_) => MergeError::UpstreamNotFound(spec.to_string()),
                other => other.into(),
            })?;
            (spec.to_string(), oid)
        }
        None => git.branch_upstream(branch).map_err(|e| match e {
            StoreError::NoUpstream(_) => MergeError::NoUpstream(branch.to_string()),
            other => other.into(),
        })?,
    };
    let merge_base = git.merge_base(branch_tip, upstream)?;
    Ok(ResolvedRefs {
        branch_tip,
        upstream_name,
        upstream,
        merge_base,
    })
}
