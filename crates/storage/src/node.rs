//! Committed tree cell
//!
//! A [`VersionedNode`] is one location of the shared, committed tree. It owns
//! its direct children and holds only a weak back-reference to its parent.
//!
//! # Validity
//!
//! `valid` transitions true → false exactly once. An invalid node is a
//! *tombstone*: it stays in its parent's child map so that a later revival can
//! be ordered against its version, but every accessor fails with
//! `NodeNotValid` so that holders of a stale reference re-resolve the Fqn.
//! Reviving an Fqn always installs a new node object.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use treecache_core::{CacheError, CacheResult, DataVersion, Fqn, NodeData, Value};

/// Point-in-time copy of a committed node
///
/// Data, version and child names are read under one lock, so the three are
/// mutually consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    /// Node name
    pub fqn: Fqn,
    /// Data map at snapshot time
    pub data: NodeData,
    /// Version at snapshot time
    pub version: DataVersion,
    /// Names of valid children at snapshot time
    pub children: BTreeSet<String>,
}

#[derive(Debug)]
struct NodeState {
    data: NodeData,
    version: DataVersion,
    children: BTreeMap<String, Arc<VersionedNode>>,
}

/// One committed node of the shared tree
pub struct VersionedNode {
    fqn: Fqn,
    valid: AtomicBool,
    parent: Weak<VersionedNode>,
    state: RwLock<NodeState>,
}

impl VersionedNode {
    /// Create the root node
    pub fn new_root() -> Arc<Self> {
        Arc::new(VersionedNode {
            fqn: Fqn::root(),
            valid: AtomicBool::new(true),
            parent: Weak::new(),
            state: RwLock::new(NodeState {
                data: NodeData::new(),
                version: DataVersion::INITIAL,
                children: BTreeMap::new(),
            }),
        })
    }

    fn new_child(
        parent: &Arc<VersionedNode>,
        name: &str,
        data: NodeData,
        version: DataVersion,
    ) -> Arc<Self> {
        Arc::new(VersionedNode {
            fqn: parent.fqn.child(name),
            valid: AtomicBool::new(true),
            parent: Arc::downgrade(parent),
            state: RwLock::new(NodeState {
                data,
                version,
                children: BTreeMap::new(),
            }),
        })
    }

    /// Node name
    pub fn fqn(&self) -> &Fqn {
        &self.fqn
    }

    /// False once the node has been removed
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn check_valid(&self) -> CacheResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CacheError::node_not_valid(&self.fqn))
        }
    }

    /// Parent node, if it is still alive
    pub fn parent(&self) -> Option<Arc<VersionedNode>> {
        self.parent.upgrade()
    }

    /// Committed version
    pub fn version(&self) -> CacheResult<DataVersion> {
        self.check_valid()?;
        Ok(self.state.read().version)
    }

    /// Version recorded on the node, valid or not
    ///
    /// For a tombstone this is the version of the removal.
    pub fn last_version(&self) -> DataVersion {
        self.state.read().version
    }

    /// Copy of the data map
    pub fn data(&self) -> CacheResult<NodeData> {
        self.check_valid()?;
        Ok(self.state.read().data.clone())
    }

    /// One data entry
    pub fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.check_valid()?;
        Ok(self.state.read().data.get(key).cloned())
    }

    /// Keys of the data map
    pub fn keys(&self) -> CacheResult<BTreeSet<String>> {
        self.check_valid()?;
        Ok(self.state.read().data.keys().cloned().collect())
    }

    /// Names of valid children
    pub fn children_names(&self) -> CacheResult<BTreeSet<String>> {
        self.check_valid()?;
        Ok(self
            .state
            .read()
            .children
            .iter()
            .filter(|(_, child)| child.is_valid())
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Valid child by name
    pub fn child(&self, name: &str) -> CacheResult<Option<Arc<VersionedNode>>> {
        self.check_valid()?;
        Ok(self
            .state
            .read()
            .children
            .get(name)
            .filter(|child| child.is_valid())
            .cloned())
    }

    /// Child entry by name, tombstones included; never fails
    pub fn child_entry(&self, name: &str) -> Option<Arc<VersionedNode>> {
        self.state.read().children.get(name).cloned()
    }

    /// Valid children
    pub fn children(&self) -> CacheResult<Vec<Arc<VersionedNode>>> {
        self.check_valid()?;
        Ok(self
            .state
            .read()
            .children
            .values()
            .filter(|child| child.is_valid())
            .cloned()
            .collect())
    }

    /// Consistent copy of data, version and child names
    pub fn snapshot(&self) -> CacheResult<NodeSnapshot> {
        self.check_valid()?;
        let state = self.state.read();
        Ok(NodeSnapshot {
            fqn: self.fqn.clone(),
            data: state.data.clone(),
            version: state.version,
            children: state
                .children
                .iter()
                .filter(|(_, child)| child.is_valid())
                .map(|(name, _)| name.clone())
                .collect(),
        })
    }

    // ========================================================================
    // Commit-time mutation (driven by DataContainer)
    // ========================================================================

    pub(crate) fn replace_data(&self, data: NodeData, version: DataVersion) -> CacheResult<()> {
        self.check_valid()?;
        let mut state = self.state.write();
        state.data = data;
        state.version = version;
        Ok(())
    }

    /// Install a fresh child under `name`, replacing any tombstone there
    ///
    /// The new node adopts the tombstones the replaced entry kept for its
    /// removed subtree, so revivals below it stay ordered against their
    /// removal versions.
    pub(crate) fn install_child(
        self: &Arc<Self>,
        name: &str,
        data: NodeData,
        version: DataVersion,
    ) -> CacheResult<Arc<VersionedNode>> {
        self.check_valid()?;
        let child = VersionedNode::new_child(self, name, data, version);
        let mut state = self.state.write();
        if let Some(previous) = state.children.get(name) {
            if !previous.is_valid() {
                let inherited: BTreeMap<String, Arc<VersionedNode>> = previous
                    .state
                    .read()
                    .children
                    .iter()
                    .filter(|(_, entry)| !entry.is_valid())
                    .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
                    .collect();
                child.state.write().children = inherited;
            }
        }
        state.children.insert(name.to_string(), Arc::clone(&child));
        Ok(child)
    }

    /// Mark this node and its whole subtree invalid
    ///
    /// Every node of the subtree stays in place as a tombstone stamped with
    /// `version`. A tombstone that was already there keeps the newer of its
    /// own stamp and `version`. Returns the number of nodes invalidated.
    pub(crate) fn invalidate(&self, version: DataVersion) -> usize {
        let children: Vec<Arc<VersionedNode>> = {
            let mut state = self.state.write();
            state.version = state.version.max(version);
            state.children.values().cloned().collect()
        };
        let mut count = 0;
        if self.valid.swap(false, Ordering::AcqRel) {
            count += 1;
        }
        for child in &children {
            count += child.invalidate(version);
        }
        count
    }

    /// Drop a tombstone entry from this node's child map
    pub(crate) fn drop_tombstone(&self, name: &str) -> bool {
        let mut state = self.state.write();
        match state.children.get(name) {
            Some(child) if !child.is_valid() => {
                state.children.remove(name);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn tombstones(&self) -> Vec<String> {
        self.state
            .read()
            .children
            .iter()
            .filter(|(_, child)| !child.is_valid())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn all_child_entries(&self) -> Vec<Arc<VersionedNode>> {
        self.state.read().children.values().cloned().collect()
    }
}

impl fmt::Debug for VersionedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("VersionedNode")
            .field("fqn", &self.fqn)
            .field("valid", &self.is_valid())
            .field("version", &state.version)
            .field("keys", &state.data.len())
            .field("children", &state.children.len())
            .finish()
    }
}
