//! Node locations inside a tree.
//!
//! A node lives in a folder made of `<type folder>/<id>` segment pairs, one
//! pair per level of nesting, and its payload is the data file `<id>.json`
//! inside that folder:
//!
//! ```text
//! Applications/app1/app1.json
//! Applications/app1/Tables/t1/t1.json
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::UniqueId;
use crate::errors::NodeError;

/// Extension of node data files.
pub const DATA_FILE_EXTENSION: &str = "json";

/// Location of a node: its folder path plus the derived data-file path.
///
/// Equality, ordering and hashing are ordinal over the folder path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    folder_path: String,
}

impl NodePath {
    /// Path of a top-level node.
    pub fn root(folder_name: &str, id: &UniqueId) -> Result<Self, NodeError> {
        check_folder_name(folder_name)?;
        Ok(Self {
            folder_path: format!("{}/{}", folder_name, id),
        })
    }

    /// Path of a node nested under `self`.
    pub fn child(&self, folder_name: &str, id: &UniqueId) -> Result<Self, NodeError> {
        check_folder_name(folder_name)?;
        Ok(Self {
            folder_path: format!("{}/{}/{}", self.folder_path, folder_name, id),
        })
    }

    /// Parse a folder path such as `Applications/app1/Tables/t1`.
    pub fn parse(folder_path: &str) -> Result<Self, NodeError> {
        let invalid = |detail: &str| NodeError::InvalidPath {
            path: folder_path.to_string(),
            detail: detail.to_string(),
        };
        let segments: Vec<&str> = folder_path.split('/').collect();
        if segments.len() < 2 || segments.len() % 2 != 0 {
            return Err(invalid("expected <folder>/<id> segment pairs"));
        }
        for pair in segments.chunks(2) {
            check_folder_name(pair[0]).map_err(|_| invalid("invalid folder segment"))?;
            UniqueId::parse(pair[1]).map_err(|_| invalid("invalid id segment"))?;
        }
        Ok(Self {
            folder_path: folder_path.to_string(),
        })
    }

    /// Interpret a repository file path as a node data file.
    ///
    /// Returns `None` for files that are not node payloads: wrong extension,
    /// file name not matching the enclosing id, or malformed folders.
    pub fn from_data_path(data_path: &str) -> Option<Self> {
        let (folder, file_name) = data_path.rsplit_once('/')?;
        let stem = file_name.strip_suffix(DATA_FILE_EXTENSION)?.strip_suffix('.')?;
        let (_, id) = folder.rsplit_once('/')?;
        if stem != id {
            return None;
        }
        Self::parse(folder).ok()
    }

    pub fn folder_path(&self) -> &str {
        &self.folder_path
    }

    /// Identifier segment (last segment of the folder path).
    pub fn id(&self) -> &str {
        self.folder_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.folder_path)
    }

    /// Type folder segment the node sits in.
    pub fn folder_name(&self) -> &str {
        self.folder_path.rsplit('/').nth(1).unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.id(), DATA_FILE_EXTENSION)
    }

    /// Repository path of the node payload.
    pub fn data_path(&self) -> String {
        format!("{}/{}", self.folder_path, self.file_name())
    }

    /// Path of the enclosing node, `None` for top-level nodes.
    pub fn parent(&self) -> Option<NodePath> {
        let mut segments: Vec<&str> = self.folder_path.split('/').collect();
        if segments.len() <= 2 {
            return None;
        }
        segments.truncate(segments.len() - 2);
        Some(Self {
            folder_path: segments.join("/"),
        })
    }

    /// Nesting level; top-level nodes have depth 1.
    pub fn depth(&self) -> usize {
        self.folder_path.split('/').count() / 2
    }

    /// True if `other` is nested somewhere under `self` (strictly).
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        other.folder_path.len() > self.folder_path.len()
            && other.folder_path.starts_with(&self.folder_path)
            && other.folder_path.as_bytes()[self.folder_path.len()] == b'/'
    }

    /// True if `other` is `self` or nested under it.
    pub fn contains(&self, other: &NodePath) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

fn check_folder_name(name: &str) -> Result<(), NodeError> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(NodeError::InvalidPath {
            path: name.to_string(),
            detail: "folder names must be non-empty, without '/' and not hidden".into(),
        });
    }
    Ok(())
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folder_path)
    }
}

impl TryFrom<String> for NodePath {
    type Error = NodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.folder_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UniqueId {
        UniqueId::parse(s).unwrap()
    }

    #[test]
    fn test_root_and_child_paths() {
        let app = NodePath::root("Applications", &id("app1")).unwrap();
        assert_eq!(app.folder_path(), "Applications/app1");
        assert_eq!(app.data_path(), "Applications/app1/app1.json");
        assert_eq!(app.depth(), 1);
        assert!(app.parent().is_none());

        let table = app.child("Tables", &id("t1")).unwrap();
        assert_eq!(table.folder_path(), "Applications/app1/Tables/t1");
        assert_eq!(table.id(), "t1");
        assert_eq!(table.folder_name(), "Tables");
        assert_eq!(table.depth(), 2);
        assert_eq!(table.parent(), Some(app));
    }

    #[test]
    fn test_from_data_path() {
        let path = NodePath::from_data_path("Applications/app1/Tables/t1/t1.json").unwrap();
        assert_eq!(path.folder_path(), "Applications/app1/Tables/t1");

        assert!(NodePath::from_data_path("README.md").is_none());
        assert!(NodePath::from_data_path("Applications/app1/other.json").is_none());
        assert!(NodePath::from_data_path("Applications/app1/app1.txt").is_none());
        assert!(NodePath::from_data_path("Applications/app1/Tables/t1.json").is_none());
    }

    #[test]
    fn test_parse_rejects_odd_segments() {
        assert!(NodePath::parse("Applications").is_err());
        assert!(NodePath::parse("Applications/app1/Tables").is_err());
        assert!(NodePath::parse("Applications//").is_err());
        assert!(NodePath::parse("Applications/app1").is_ok());
    }

    #[test]
    fn test_ancestry_respects_segment_boundaries() {
        let a = NodePath::parse("A/a").unwrap();
        let ab = NodePath::parse("A/a/B/b").unwrap();
        let lookalike = NodePath::parse("A/ab/B/b").unwrap();

        assert!(a.is_ancestor_of(&ab));
        assert!(!ab.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(a.contains(&a));
        assert!(!a.is_ancestor_of(&lookalike));
    }

    #[test]
    fn test_equality_is_case_sensitive() {
        let lower = NodePath::parse("A/x").unwrap();
        let upper = NodePath::parse("A/X").unwrap();
        assert_ne!(lower, upper);
    }
}
