//! Handle to one committed node
//!
//! A [`Node`] reads the committed node it was resolved from, and routes
//! writes through its cache by Fqn. Once the node is removed (or replaced by
//! a remove-then-recreate) the handle is permanently invalid: every call
//! fails with `NodeNotValid` and the caller has to resolve the Fqn again.

use crate::cache::TreeCache;
use crate::ops::TreeOperations;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use treecache_core::{CacheError, CacheResult, DataVersion, Fqn, NodeData, Value};
use treecache_storage::VersionedNode;

/// A committed tree node
#[derive(Clone)]
pub struct Node {
    node: Arc<VersionedNode>,
    cache: TreeCache,
}

impl Node {
    pub(crate) fn new(node: Arc<VersionedNode>, cache: TreeCache) -> Self {
        Node { node, cache }
    }

    /// Node name
    pub fn fqn(&self) -> &Fqn {
        self.node.fqn()
    }

    /// False once the node has been removed
    pub fn is_valid(&self) -> bool {
        self.node.is_valid()
    }

    fn check_valid(&self) -> CacheResult<()> {
        if self.node.is_valid() {
            Ok(())
        } else {
            Err(CacheError::node_not_valid(self.node.fqn()))
        }
    }

    /// Committed version
    pub fn version(&self) -> CacheResult<DataVersion> {
        self.node.version()
    }

    /// One committed data entry
    pub fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.node.get(key)
    }

    /// Committed data map
    pub fn data(&self) -> CacheResult<NodeData> {
        self.node.data()
    }

    /// Committed data keys
    pub fn keys(&self) -> CacheResult<BTreeSet<String>> {
        self.node.keys()
    }

    /// Names of committed children
    pub fn children_names(&self) -> CacheResult<BTreeSet<String>> {
        self.node.children_names()
    }

    /// Committed child by name
    pub fn child(&self, name: &str) -> CacheResult<Option<Node>> {
        Ok(self
            .node
            .child(name)?
            .map(|child| Node::new(child, self.cache.clone())))
    }

    /// Committed children
    pub fn children(&self) -> CacheResult<Vec<Node>> {
        Ok(self
            .node
            .children()?
            .into_iter()
            .map(|child| Node::new(child, self.cache.clone()))
            .collect())
    }

    /// Parent node; None for the root
    pub fn parent(&self) -> CacheResult<Option<Node>> {
        self.check_valid()?;
        Ok(self
            .node
            .parent()
            .map(|parent| Node::new(parent, self.cache.clone())))
    }

    // Writes go through the cache, joining the thread's transaction if any

    /// Set one data entry
    pub fn put(&self, key: &str, value: Value) -> CacheResult<Option<Value>> {
        self.check_valid()?;
        self.cache.put(self.fqn(), key, value)
    }

    /// Merge `data` into the node's data
    pub fn put_all(&self, data: NodeData) -> CacheResult<()> {
        self.check_valid()?;
        self.cache.put_all(self.fqn(), data)
    }

    /// Remove one data entry
    pub fn remove_key(&self, key: &str) -> CacheResult<Option<Value>> {
        self.check_valid()?;
        self.cache.remove_key(self.fqn(), key)
    }

    /// Empty the node's data
    pub fn clear_data(&self) -> CacheResult<()> {
        self.check_valid()?;
        self.cache.clear_data(self.fqn())
    }

    /// Create a child with empty data; returns its Fqn
    ///
    /// # Errors
    ///
    /// `InvalidFqn` if `name` is empty or contains the separator.
    pub fn add_child(&self, name: &str) -> CacheResult<Fqn> {
        self.check_valid()?;
        let child = self.fqn().try_child(name)?;
        self.cache.put_all(&child, NodeData::new())?;
        Ok(child)
    }

    /// Remove a child and its subtree; false if it did not exist
    pub fn remove_child(&self, name: &str) -> CacheResult<bool> {
        self.check_valid()?;
        self.cache.remove_node(&self.fqn().try_child(name)?)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("fqn", self.node.fqn())
            .field("valid", &self.node.is_valid())
            .finish()
    }
}
