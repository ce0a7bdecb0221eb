//! Error types for the nodetree core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Conflicts are not errors: edit and tree conflicts are reported through
//! merge statuses. Everything here is a hard failure that the caller is
//! expected to surface rather than retry.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Node model errors
// ---------------------------------------------------------------------------

/// Errors from the identity, path and schema model.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A unique identifier failed validation.
    #[error("invalid unique id '{0}'")]
    InvalidId(String),

    /// A folder or data path could not be interpreted as a node path.
    #[error("invalid node path '{path}': {detail}")]
    InvalidPath { path: String, detail: String },

    /// The node type is not registered in the schema.
    #[error("unknown node type '{0}'")]
    UnknownType(String),

    /// The property is not declared on the node type.
    #[error("node type '{node_type}' has no property '{property}'")]
    UnknownProperty { node_type: String, property: String },

    /// A property is declared as a reference but holds something else.
    #[error("property '{property}' of '{node_type}' is not a valid reference")]
    InvalidReference { node_type: String, property: String },

    /// A type name or folder name was registered twice.
    #[error("duplicate schema registration: {0}")]
    DuplicateRegistration(String),

    /// The node already lives at a different path.
    #[error("node '{id}' already has path '{existing}'")]
    PathAlreadyAssigned { id: String, existing: String },
}

// ---------------------------------------------------------------------------
// Content store errors
// ---------------------------------------------------------------------------

/// Errors from the git-backed content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The branch has no configured upstream.
    #[error("branch '{0}' has no upstream")]
    NoUpstream(String),

    /// A blob expected at a path is missing from the tree.
    #[error("no object at '{path}' in tree {tree}")]
    ObjectNotFound { tree: String, path: String },
}

// ---------------------------------------------------------------------------
// Serialization errors
// ---------------------------------------------------------------------------

/// Errors from converting nodes to and from their stored payload.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Malformed JSON or a JSON shape that is not a node object.
    #[error("node payload at '{path}' is malformed: {detail}")]
    Malformed { path: String, detail: String },

    /// The payload does not name its node type.
    #[error("node payload at '{0}' has no $type")]
    MissingType(String),

    /// The payload id disagrees with the id encoded in its path.
    #[error("node payload at '{path}' has id '{found}', expected '{expected}'")]
    IdMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A reference points at a node absent from the snapshot.
    #[error("node '{path}' references missing node '{target}' via '{property}'")]
    DanglingReference {
        path: String,
        property: String,
        target: String,
    },

    /// Underlying JSON encoder error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema problem encountered while decoding.
    #[error("node schema error: {0}")]
    Node(#[from] NodeError),

    /// The reference resolver failed to read the store.
    #[error("reference lookup failed: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Diff errors
// ---------------------------------------------------------------------------

/// Errors from tree comparison and node comparison.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The content store reported a change kind the differ does not handle.
    #[error("unsupported change kind {kind} at '{path}'")]
    UnsupportedChange { path: String, kind: String },

    /// Old and new payloads at the same path are different node types.
    #[error("node type changed at '{path}': '{old}' -> '{new}'")]
    TypeMismatch {
        path: String,
        old: String,
        new: String,
    },

    #[error("diff store error: {0}")]
    Store(#[from] StoreError),

    #[error("diff serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

// ---------------------------------------------------------------------------
// Transformation (commit writer) errors
// ---------------------------------------------------------------------------

/// Errors from materializing pending node writes into trees and commits.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform node error: {0}")]
    Node(#[from] NodeError),

    #[error("transform store error: {0}")]
    Store(#[from] StoreError),

    #[error("transform serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the merge engine and the merge/rebase orchestrators.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A merge change was built with no ancestor, ours or theirs node.
    #[error("merge change has no ancestor, ours or theirs node")]
    AllSnapshotsMissing,

    /// No conflict is registered for the property.
    #[error("no conflict on property '{property}' of '{path}'")]
    ConflictNotFound { path: String, property: String },

    /// Attempted to resolve a conflict that is already resolved.
    #[error("conflict on property '{property}' of '{path}' is already resolved")]
    AlreadyResolved { path: String, property: String },

    /// The change has no tree conflict to resolve.
    #[error("'{0}' has no tree conflict")]
    NoTreeConflict(String),

    /// The tree conflict was already resolved.
    #[error("tree conflict on '{0}' is already resolved")]
    TreeConflictAlreadyResolved(String),

    /// The resolution cannot produce a value for this conflict.
    #[error("invalid resolution for property '{property}' of '{path}': {detail}")]
    InvalidResolution {
        path: String,
        property: String,
        detail: String,
    },

    /// Materialization or commit attempted while conflicts remain.
    #[error("unresolved conflicts remain on '{0}'")]
    UnresolvedConflicts(String),

    /// One side added a node beneath a folder the other side deleted.
    #[error("'{added}' was added under '{deleted}', which the other side deleted")]
    AddedUnderDeletedAncestor { deleted: String, added: String },

    /// The upstream commit-ish could not be resolved.
    #[error("upstream '{0}' could not be resolved")]
    UpstreamNotFound(String),

    /// The branch has no configured upstream and none was supplied.
    #[error("branch '{0}' has no upstream and none was given")]
    NoUpstream(String),

    /// The branch does not exist.
    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    /// The merge result has already been committed.
    #[error("merge of '{0}' is already committed")]
    AlreadyCommitted(String),

    /// The orchestrator is not in a state that allows the operation.
    #[error("cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    #[error("merge node error: {0}")]
    Node(#[from] NodeError),

    #[error("merge store error: {0}")]
    Store(#[from] StoreError),

    #[error("merge serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("merge diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("merge commit error: {0}")]
    Transform(#[from] TransformError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The configured node types do not form a valid schema.
    #[error("invalid node schema: {0}")]
    Schema(#[from] NodeError),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
