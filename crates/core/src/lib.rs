//! nodetree core library.
//!
//! Domain nodes are stored as one JSON data file per node in a git tree,
//! nested by containment (`Applications/<id>/Tables/<id>/<id>.json`). This
//! crate provides the node model and schema, the git-backed node store,
//! node-level diffs between trees, property-level three-way merge with edit
//! and tree conflicts, and the branch merge and rebase orchestrators built
//! on top of them.

pub mod config;
pub mod diff;
pub mod errors;
pub mod merge;
pub mod node;
pub mod serializer;
pub mod store;

#[cfg(test)]
mod testing;

// Re-exports for convenience.
pub use config::AppConfig;
pub use diff::{ChangeStatus, ComparisonPolicy, NodeChange, NodeChanges};
pub use errors::CoreError;
pub use merge::{
    ConflictStrategy, MergeChangeStatus, MergePolicy, MergeStatus, NodeMerge, NodeMergeChange,
    NodeRebase, RebaseStatus, Resolution, TreeResolution,
};
pub use node::{Node, NodePath, Schema, UniqueId};
pub use serializer::{JsonSerializer, NodeSerializer};
pub use store::{NodeStore, TreeEdits};
