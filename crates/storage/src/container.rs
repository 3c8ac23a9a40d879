//! The shared, committed tree
//!
//! `DataContainer` owns the root [`VersionedNode`] and the version stamp
//! counter. Lookups walk from the root; commit-time changes are applied
//! through the `create_*`/`update`/`remove` methods by a context that already
//! holds the write locks for every Fqn it touches.
//!
//! # Version Stamps
//!
//! One monotonic counter per container. Each commit allocates one stamp for
//! all the nodes it writes. Explicit stamps supplied by callers are folded into
//! the counter so allocation never goes backwards.
//!
//! # Commit Guard
//!
//! A commit validates its workspace and merges it while holding a
//! [`CommitGuard`]. Commits that only create or update nodes share the guard;
//! a commit that removes or replaces a committed node holds it exclusively,
//! so no other commit can validate against a parent it is about to take away.

use crate::node::VersionedNode;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use treecache_core::{CacheError, CacheResult, DataVersion, Fqn, NodeData};

/// Shared tree of committed nodes
pub struct DataContainer {
    root: Arc<VersionedNode>,
    version: AtomicU64,
    structure: RwLock<()>,
}

/// Held by a commit from validation until its last change is merged
pub struct CommitGuard<'a> {
    _shared: Option<RwLockReadGuard<'a, ()>>,
    exclusive: Option<RwLockWriteGuard<'a, ()>>,
}

impl CommitGuard<'_> {
    /// True if no other commit can run alongside this one
    pub fn is_exclusive(&self) -> bool {
        self.exclusive.is_some()
    }
}

impl DataContainer {
    /// Create a container holding only the root node
    pub fn new() -> Self {
        DataContainer {
            root: VersionedNode::new_root(),
            version: AtomicU64::new(DataVersion::INITIAL.as_u64()),
            structure: RwLock::new(()),
        }
    }

    /// The root node
    pub fn root(&self) -> &Arc<VersionedNode> {
        &self.root
    }

    /// Enter the commit section; `structural` for commits that remove nodes
    pub fn begin_commit(&self, structural: bool) -> CommitGuard<'_> {
        if structural {
            CommitGuard {
                _shared: None,
                exclusive: Some(self.structure.write()),
            }
        } else {
            CommitGuard {
                _shared: Some(self.structure.read()),
                exclusive: None,
            }
        }
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Latest allocated version stamp
    pub fn current_version(&self) -> DataVersion {
        DataVersion::new(self.version.load(Ordering::SeqCst))
    }

    /// Allocate the next version stamp
    pub fn allocate_version(&self) -> DataVersion {
        DataVersion::new(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Make sure future allocations are newer than `version`
    pub fn observe_version(&self, version: DataVersion) {
        self.version.fetch_max(version.as_u64(), Ordering::SeqCst);
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Valid node at `fqn`
    pub fn peek(&self, fqn: &Fqn) -> Option<Arc<VersionedNode>> {
        self.peek_entry(fqn).filter(|node| node.is_valid())
    }

    /// Node entry at `fqn`, which may be a tombstone
    ///
    /// Every ancestor on the way must be valid.
    pub fn peek_entry(&self, fqn: &Fqn) -> Option<Arc<VersionedNode>> {
        let mut current = Arc::clone(&self.root);
        for (depth, element) in fqn.elements().iter().enumerate() {
            if !current.is_valid() {
                return None;
            }
            let next = current.child_entry(element)?;
            if depth + 1 < fqn.len() && !next.is_valid() {
                return None;
            }
            current = next;
        }
        Some(current)
    }

    /// True if a valid node exists at `fqn`
    pub fn exists(&self, fqn: &Fqn) -> bool {
        self.peek(fqn).is_some()
    }

    /// Newest removal stamp covering `fqn`
    ///
    /// Looks at the tombstones on the path to `fqn`: the one at `fqn` itself
    /// and those of removed ancestors. A removed subtree keeps its tombstones
    /// in place, so a node revived below a revived ancestor is still ordered
    /// against its own removal. None if `fqn` is a valid node or nothing on
    /// the path was removed.
    pub fn tombstone_version(&self, fqn: &Fqn) -> Option<DataVersion> {
        let mut newest: Option<DataVersion> = None;
        let mut current = Arc::clone(&self.root);
        for element in fqn.elements() {
            let Some(next) = current.child_entry(element) else {
                break;
            };
            if !next.is_valid() {
                let removed = next.last_version();
                newest = Some(newest.map_or(removed, |v| v.max(removed)));
            }
            current = next;
        }
        newest
    }

    /// Fqns of all valid descendants of `fqn`, parents before children
    pub fn descendants(&self, fqn: &Fqn) -> Vec<Fqn> {
        let mut out = Vec::new();
        if let Some(node) = self.peek(fqn) {
            Self::collect_descendants(&node, &mut out);
        }
        out
    }

    fn collect_descendants(node: &Arc<VersionedNode>, out: &mut Vec<Fqn>) {
        for child in node.children().unwrap_or_default() {
            out.push(child.fqn().clone());
            Self::collect_descendants(&child, out);
        }
    }

    /// Number of valid nodes, root included
    pub fn number_of_nodes(&self) -> usize {
        1 + self.descendants(&Fqn::root()).len()
    }

    // ========================================================================
    // Commit-time mutation
    // ========================================================================

    /// Write `data` at `fqn`, creating the node if it is absent
    ///
    /// An existing valid node is updated in place; a missing node or a
    /// tombstone is replaced by a new node object.
    ///
    /// # Errors
    ///
    /// `NodeNotExists` if the parent is not a valid node.
    pub fn create_or_update(
        &self,
        fqn: &Fqn,
        data: NodeData,
        version: DataVersion,
    ) -> CacheResult<Arc<VersionedNode>> {
        if let Some(existing) = self.peek(fqn) {
            self.observe_version(version);
            existing.replace_data(data, version)?;
            return Ok(existing);
        }
        self.install_fresh(fqn, data, version)
    }

    /// Install a new node object at `fqn`, replacing whatever entry is there
    pub fn install_fresh(
        &self,
        fqn: &Fqn,
        data: NodeData,
        version: DataVersion,
    ) -> CacheResult<Arc<VersionedNode>> {
        let (parent_fqn, name) = match (fqn.parent(), fqn.last_element()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => {
                return Err(CacheError::invalid_operation(
                    "the root node cannot be created",
                ))
            }
        };
        let parent = self
            .peek(&parent_fqn)
            .ok_or_else(|| CacheError::node_not_exists(&parent_fqn))?;
        if let Some(previous) = parent.child_entry(name) {
            if previous.is_valid() {
                previous.invalidate(version);
            }
        }
        debug!(target: "treecache::storage", fqn = %fqn, version = %version, "Node installed");
        self.observe_version(version);
        parent.install_child(name, data, version)
    }

    /// Replace the data of an existing node
    pub fn update(&self, fqn: &Fqn, data: NodeData, version: DataVersion) -> CacheResult<()> {
        let node = self
            .peek(fqn)
            .ok_or_else(|| CacheError::node_not_exists(fqn))?;
        self.observe_version(version);
        node.replace_data(data, version)
    }

    /// Remove the node at `fqn` and its whole subtree
    ///
    /// The node is left in its parent as a tombstone stamped with `version`.
    /// Returns the removed node, or `None` if nothing valid was there.
    pub fn remove(&self, fqn: &Fqn, version: DataVersion) -> CacheResult<Option<Arc<VersionedNode>>> {
        if fqn.is_root() {
            return Err(CacheError::invalid_operation(
                "the root node cannot be removed",
            ));
        }
        match self.peek(fqn) {
            Some(node) => {
                let count = node.invalidate(version);
                self.observe_version(version);
                debug!(target: "treecache::storage", fqn = %fqn, nodes = count, "Subtree tombstoned");
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Drop every tombstone from the tree; returns how many were dropped
    ///
    /// After a purge, revivals of the purged Fqns are no longer ordered
    /// against the removal version.
    pub fn purge_tombstones(&self) -> usize {
        Self::purge_under(&self.root)
    }

    fn purge_under(node: &Arc<VersionedNode>) -> usize {
        let mut purged = 0;
        for name in node.tombstones() {
            if node.drop_tombstone(&name) {
                purged += 1;
            }
        }
        for child in node.all_child_entries() {
            purged += Self::purge_under(&child);
        }
        purged
    }

    /// Human-readable dump of the valid tree
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        Self::print_node(&self.root, 0, &mut out);
        out
    }

    fn print_node(node: &Arc<VersionedNode>, depth: usize, out: &mut String) {
        let name = node.fqn().last_element().unwrap_or("/");
        let version = node.last_version();
        let keys = node.keys().unwrap_or_default();
        let _ = writeln!(
            out,
            "{}{} ({}) {:?}",
            "  ".repeat(depth),
            name,
            version,
            keys
        );
        for child in node.children().unwrap_or_default() {
            Self::print_node(&child, depth + 1, out);
        }
    }
}

impl Default for DataContainer {
    fn default() -> Self {
        Self::new()
    }
}
