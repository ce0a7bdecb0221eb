//! Conflict resolution strategies and the merge policy.
//!
//! A [`ValueResolver`] gets a chance to settle every property conflict while
//! a merge change is initialized. Whatever it leaves undecided is exposed to
//! the caller, who settles it later with a [`Resolution`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::node_merge::ValueConflict;
use crate::diff::ComparisonPolicy;
use crate::errors::MergeError;

/// How a single property conflict is settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    AcceptOurs,
    AcceptTheirs,
    /// Keep the common ancestor's value; invalid when there is no ancestor.
    AcceptAncestor,
    AcceptValue(Value),
}

impl Resolution {
    /// The value this resolution writes for `conflict`.
    pub fn value_for(&self, path: &str, conflict: &ValueConflict) -> Result<Value, MergeError> {
        match self {
            Self::AcceptOurs => Ok(conflict.ours().clone()),
            Self::AcceptTheirs => Ok(conflict.theirs().clone()),
            Self::AcceptAncestor => {
                conflict
                    .ancestor()
                    .cloned()
                    .ok_or_else(|| MergeError::InvalidResolution {
                        path: path.to_string(),
                        property: conflict.property().to_string(),
                        detail: "node has no common ancestor".into(),
                    })
            }
            Self::AcceptValue(value) => Ok(value.clone()),
        }
    }
}

/// How a tree conflict is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeResolution {
    /// Let the deletion win: the node (and anything orphaned by it) goes.
    AcceptDeletion,
    /// Keep the node with its merged values.
    KeepNode,
}

/// Decides property conflicts during merge initialization.
///
/// Returning `None` leaves the conflict for the caller.
pub trait ValueResolver: Send + Sync {
    fn resolve(&self, conflict: &ValueConflict) -> Option<Resolution>;
}

impl<F> ValueResolver for F
where
    F: Fn(&ValueConflict) -> Option<Resolution> + Send + Sync,
{
    fn resolve(&self, conflict: &ValueConflict) -> Option<Resolution> {
        self(conflict)
    }
}

/// Built-in resolvers selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Leave every conflict to the caller.
    #[default]
    Manual,
    AcceptOurs,
    AcceptTheirs,
}

impl ValueResolver for ConflictStrategy {
    fn resolve(&self, _conflict: &ValueConflict) -> Option<Resolution> {
        match self {
            Self::Manual => None,
            Self::AcceptOurs => Some(Resolution::AcceptOurs),
            Self::AcceptTheirs => Some(Resolution::AcceptTheirs),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::AcceptOurs => write!(f, "accept_ours"),
            Self::AcceptTheirs => write!(f, "accept_theirs"),
        }
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "accept_ours" | "ours" => Ok(Self::AcceptOurs),
            "accept_theirs" | "theirs" => Ok(Self::AcceptTheirs),
            other => Err(format!(
                "unknown strategy '{}' (expected manual, accept_ours or accept_theirs)",
                other
            )),
        }
    }
}

/// What to do when one side adds a node under a node the other side deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddedUnderDeletedPolicy {
    /// Fail the merge with [`MergeError::AddedUnderDeletedAncestor`].
    #[default]
    Reject,
    /// Report a tree conflict on the deleted node.
    Conflict,
}

/// Whether changes are being merged or replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Merge,
    /// Drop decisions whose outcome the local side already has.
    Rebase,
}

/// Everything the merge engine needs to know besides the changes.
#[derive(Clone)]
pub struct MergePolicy {
    comparison: ComparisonPolicy,
    resolver: Arc<dyn ValueResolver>,
    added_under_deleted: AddedUnderDeletedPolicy,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            comparison: ComparisonPolicy::default(),
            resolver: Arc::new(ConflictStrategy::Manual),
            added_under_deleted: AddedUnderDeletedPolicy::default(),
        }
    }
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergePolicy")
            .field("comparison", &self.comparison)
            .field("added_under_deleted", &self.added_under_deleted)
            .finish_non_exhaustive()
    }
}

impl MergePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comparison(mut self, comparison: ComparisonPolicy) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn with_resolver(mut self, resolver: impl ValueResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_strategy(self, strategy: ConflictStrategy) -> Self {
        self.with_resolver(strategy)
    }

    pub fn with_added_under_deleted(mut self, policy: AddedUnderDeletedPolicy) -> Self {
        self.added_under_deleted = policy;
        self
    }

    pub fn comparison(&self) -> &ComparisonPolicy {
        &self.comparison
    }

    pub fn resolver(&self) -> &dyn ValueResolver {
        self.resolver.as_ref()
    }

    pub fn added_under_deleted(&self) -> AddedUnderDeletedPolicy {
        self.added_under_deleted
    }
}
