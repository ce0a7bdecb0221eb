//! Memoizing node reader over a single tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use git2::Oid;

use super::GitStore;
use crate::errors::SerializationError;
use crate::node::{Node, NodePath, ReferenceResolver};
use crate::serializer::NodeSerializer;

/// Read access to the nodes of one tree.
///
/// Each path is deserialized at most once per snapshot; entries are never
/// invalidated since trees are immutable.
pub struct Snapshot<'s> {
    git: &'s GitStore,
    serializer: &'s dyn NodeSerializer,
    tree: Option<Oid>,
    cache: RefCell<HashMap<NodePath, Option<Arc<Node>>>>,
}

impl<'s> Snapshot<'s> {
    /// `tree = None` reads as the empty tree.
    pub fn new(git: &'s GitStore, serializer: &'s dyn NodeSerializer, tree: Option<Oid>) -> Self {
        Self {
            git,
            serializer,
            tree,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn tree(&self) -> Option<Oid> {
        self.tree
    }

    /// Node at `path`, reading the blob id from the tree.
    pub fn get(&self, path: &NodePath) -> Result<Option<Arc<Node>>, SerializationError> {
        if let Some(cached) = self.cache.borrow().get(path) {
            return Ok(cached.clone());
        }
        let blob = match self.tree {
            Some(tree) => self.git.entry_id(tree, &path.data_path())?,
            None => None,
        };
        let node = match blob {
            Some(blob) => Some(self.decode(path, blob)?),
            None => None,
        };
        self.cache.borrow_mut().insert(path.clone(), node.clone());
        Ok(node)
    }

    /// Node at `path` when the caller already knows its blob id.
    pub fn load(&self, path: &NodePath, blob: Oid) -> Result<Arc<Node>, SerializationError> {
        if let Some(Some(cached)) = self.cache.borrow().get(path) {
            return Ok(Arc::clone(cached));
        }
        let node = self.decode(path, blob)?;
        self.cache
            .borrow_mut()
            .insert(path.clone(), Some(Arc::clone(&node)));
        Ok(node)
    }

    /// Every node in the tree, ordered by path.
    pub fn nodes(&self) -> Result<Vec<Arc<Node>>, SerializationError> {
        let Some(tree) = self.tree else {
            return Ok(Vec::new());
        };
        let mut paths: Vec<NodePath> = self
            .git
            .list_files(tree)?
            .iter()
            .filter_map(|file| NodePath::from_data_path(file))
            .collect();
        paths.sort();
        let mut nodes = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(node) = self.get(path)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn decode(&self, path: &NodePath, blob: Oid) -> Result<Arc<Node>, SerializationError> {
        let bytes = self.git.blob(blob)?;
        Ok(Arc::new(self.serializer.deserialize(&bytes, path, self)?))
    }
}

impl ReferenceResolver for Snapshot<'_> {
    fn exists(&self, path: &NodePath) -> Result<bool, SerializationError> {
        if let Some(cached) = self.cache.borrow().get(path) {
            return Ok(cached.is_some());
        }
        match self.tree {
            Some(tree) => Ok(self.git.entry_id(tree, &path.data_path())?.is_some()),
            None => Ok(false),
        }
    }

    fn resolve(&self, path: &NodePath) -> Result<Option<Arc<Node>>, SerializationError> {
        self.get(path)
    }
}
