//! Invocation context and workspace nodes
//!
//! An [`InvocationContext`] is the state of one unit of work: a bare thread
//! running a single non-transactional call, or a transaction spanning many
//! calls (and possibly many threads, via suspend/resume). It holds:
//!
//! - the lock owner identity
//! - the set of Fqns this context has locked
//! - the workspace: private copies of every node this context touched
//! - per-call option overrides
//!
//! # Workspace Ordering
//!
//! The workspace is a `BTreeMap` keyed by Fqn. Fqn ordering puts a parent
//! before all of its descendants and keeps every subtree contiguous, so a
//! commit that walks the map in order applies parent creations before child
//! creations, and subtree scans are range queries.
//!
//! # Sharing
//!
//! A transactional context is shared as [`SharedContext`]. Whoever runs the
//! transaction locks the mutex for the duration of one operation; the context
//! itself never depends on which thread that is.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::thread::ThreadId;
use treecache_core::{DataVersion, Fqn, GlobalTransaction, LockOwner, NodeData, Options, Value};
use treecache_storage::{NodeSnapshot, VersionedNode};

/// Context shared between whichever threads run a transaction
pub type SharedContext = Arc<Mutex<InvocationContext>>;

// ============================================================================
// WorkspaceNode
// ============================================================================

/// Private copy of one node, owned by a single context
///
/// An entry is either a copy of a committed node, a "no node" marker
/// (`read_version == None` and not created), or a node this context created.
#[derive(Debug, Clone)]
pub struct WorkspaceNode {
    fqn: Fqn,
    /// Committed version observed when the entry was made; None = no node
    read_version: Option<DataVersion>,
    data: NodeData,
    /// Data as first observed, for notification before-images
    original: Option<NodeData>,
    /// Committed child names when the entry was made
    children: BTreeSet<String>,
    base: Option<Arc<VersionedNode>>,
    changed: bool,
    created: bool,
    removed: bool,
    replaces_base: bool,
    locked: bool,
}

impl WorkspaceNode {
    /// Copy of a committed node
    pub fn from_snapshot(snapshot: NodeSnapshot, base: Arc<VersionedNode>) -> Self {
        WorkspaceNode {
            fqn: snapshot.fqn,
            read_version: Some(snapshot.version),
            original: Some(snapshot.data.clone()),
            data: snapshot.data,
            children: snapshot.children,
            base: Some(base),
            changed: false,
            created: false,
            removed: false,
            replaces_base: false,
            locked: false,
        }
    }

    /// "No node" marker
    pub fn absent(fqn: Fqn) -> Self {
        WorkspaceNode {
            fqn,
            read_version: None,
            data: NodeData::new(),
            original: None,
            children: BTreeSet::new(),
            base: None,
            changed: false,
            created: false,
            removed: false,
            replaces_base: false,
            locked: false,
        }
    }

    /// Node created by this context where none was visible
    pub fn created(fqn: Fqn) -> Self {
        let mut node = Self::absent(fqn);
        node.recreate();
        node
    }

    /// Node name
    pub fn fqn(&self) -> &Fqn {
        &self.fqn
    }

    /// Committed version observed when the entry was made
    pub fn read_version(&self) -> Option<DataVersion> {
        self.read_version
    }

    /// True if the node exists in this context's view
    pub fn is_present(&self) -> bool {
        !self.removed && (self.created || self.read_version.is_some())
    }

    /// True if this entry will change the committed tree at commit
    pub fn is_dirty(&self) -> bool {
        self.changed || self.created || self.removed
    }

    /// Data in this context's view
    pub fn data(&self) -> &NodeData {
        &self.data
    }

    /// Data as first observed, None if the node did not exist
    pub fn original(&self) -> Option<&NodeData> {
        self.original.as_ref()
    }

    /// Committed child names recorded when the entry was made
    pub fn pinned_children(&self) -> &BTreeSet<String> {
        &self.children
    }

    /// The committed node this entry was copied from
    pub fn base(&self) -> Option<&Arc<VersionedNode>> {
        self.base.as_ref()
    }

    /// Data was modified
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Node is created by this context
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Node is removed by this context
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// The committed node will be tombstoned at commit
    pub fn replaces_base(&self) -> bool {
        self.replaces_base
    }

    /// This context holds the write lock for the entry
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Record that the write lock is held
    pub fn mark_locked(&mut self) {
        self.locked = true;
    }

    /// Set one data entry; returns the previous value
    pub fn put(&mut self, key: String, value: Value) -> Option<Value> {
        self.changed = true;
        self.data.insert(key, value)
    }

    /// Merge entries into the data map
    pub fn put_all(&mut self, data: NodeData) {
        self.changed = true;
        self.data.extend(data);
    }

    /// Replace the whole data map
    pub fn replace_data(&mut self, data: NodeData) {
        self.changed = true;
        self.data = data;
    }

    /// Remove one data entry; returns the previous value
    pub fn remove_key(&mut self, key: &str) -> Option<Value> {
        let previous = self.data.remove(key);
        if previous.is_some() {
            self.changed = true;
        }
        previous
    }

    /// Empty the data map
    pub fn clear_data(&mut self) {
        if !self.data.is_empty() {
            self.changed = true;
        }
        self.data.clear();
    }

    /// Remove the node from this context's view
    pub fn mark_removed(&mut self) {
        self.replaces_base |= self.read_version.is_some();
        self.removed = true;
        self.created = false;
        self.changed = false;
        self.data.clear();
        self.children.clear();
    }

    /// Make the node exist again as a new, empty node
    ///
    /// A committed node that was visible before is replaced at commit by a
    /// new node object. The entry counts as changed only once data is
    /// written to it.
    pub fn recreate(&mut self) {
        self.replaces_base |= self.read_version.is_some();
        self.removed = false;
        self.created = true;
        self.changed = false;
        self.data.clear();
        self.children.clear();
    }
}

// ============================================================================
// InvocationContext
// ============================================================================

/// State of one thread call or one transaction
#[derive(Debug)]
pub struct InvocationContext {
    thread: ThreadId,
    global_tx: Option<GlobalTransaction>,
    locked_fqns: FxHashSet<Fqn>,
    workspace: BTreeMap<Fqn, WorkspaceNode>,
    moves: Vec<(Fqn, Fqn)>,
    options: Options,
}

impl InvocationContext {
    /// Context for a non-transactional call on the current thread
    pub fn for_thread() -> Self {
        InvocationContext {
            thread: std::thread::current().id(),
            global_tx: None,
            locked_fqns: FxHashSet::default(),
            workspace: BTreeMap::new(),
            moves: Vec::new(),
            options: Options::default(),
        }
    }

    /// Context for a transaction
    pub fn for_transaction(gtx: GlobalTransaction) -> Self {
        InvocationContext {
            global_tx: Some(gtx),
            ..Self::for_thread()
        }
    }

    /// Wrap into a shareable handle
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// The transaction, if any
    pub fn global_transaction(&self) -> Option<GlobalTransaction> {
        self.global_tx
    }

    /// True if this context belongs to a transaction
    pub fn is_transactional(&self) -> bool {
        self.global_tx.is_some()
    }

    /// Owner of every lock this context takes
    pub fn lock_owner(&self) -> LockOwner {
        match self.global_tx {
            Some(gtx) => LockOwner::Transaction(gtx),
            None => LockOwner::Thread(self.thread),
        }
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Active option overrides
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replace the option overrides
    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Reset all overrides
    pub fn clear_options(&mut self) {
        self.options = Options::default();
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// True if this context holds the lock for `fqn`
    pub fn holds_lock(&self, fqn: &Fqn) -> bool {
        self.locked_fqns.contains(fqn)
    }

    /// Record a newly acquired lock; false if it was already recorded
    pub fn record_lock(&mut self, fqn: Fqn) -> bool {
        self.locked_fqns.insert(fqn)
    }

    /// Forget a released lock
    pub fn forget_lock(&mut self, fqn: &Fqn) -> bool {
        self.locked_fqns.remove(fqn)
    }

    /// Fqns currently locked by this context
    pub fn locked_fqns(&self) -> impl Iterator<Item = &Fqn> {
        self.locked_fqns.iter()
    }

    /// Number of locks held
    pub fn num_locks(&self) -> usize {
        self.locked_fqns.len()
    }

    /// Take every recorded lock, leaving the set empty
    pub fn take_locked_fqns(&mut self) -> Vec<Fqn> {
        self.locked_fqns.drain().collect()
    }

    // ========================================================================
    // Workspace
    // ========================================================================

    /// Workspace entry for `fqn`
    pub fn lookup(&self, fqn: &Fqn) -> Option<&WorkspaceNode> {
        self.workspace.get(fqn)
    }

    /// Mutable workspace entry for `fqn`
    pub fn lookup_mut(&mut self, fqn: &Fqn) -> Option<&mut WorkspaceNode> {
        self.workspace.get_mut(fqn)
    }

    /// Insert (or replace) an entry; returns a mutable reference to it
    pub fn insert(&mut self, node: WorkspaceNode) -> &mut WorkspaceNode {
        match self.workspace.entry(node.fqn().clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(node);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(node),
        }
    }

    /// Drop the entry for `fqn`
    pub fn remove_entry(&mut self, fqn: &Fqn) -> Option<WorkspaceNode> {
        self.workspace.remove(fqn)
    }

    /// Entries for strict descendants of `fqn`, parents first
    pub fn descendants<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> impl Iterator<Item = &'a WorkspaceNode> + 'a {
        self.workspace
            .range::<Fqn, _>((Bound::Excluded(fqn), Bound::Unbounded))
            .take_while(move |(key, _)| key.is_descendant_of(fqn))
            .map(|(_, node)| node)
    }

    /// Entries for direct children of `fqn`
    pub fn direct_children<'a>(
        &'a self,
        fqn: &'a Fqn,
    ) -> impl Iterator<Item = &'a WorkspaceNode> + 'a {
        self.descendants(fqn)
            .filter(move |node| node.fqn().is_direct_child_of(fqn))
    }

    /// Drop every entry strictly below `fqn`
    pub fn remove_descendants(&mut self, fqn: &Fqn) -> Vec<WorkspaceNode> {
        let keys: Vec<Fqn> = self.descendants(fqn).map(|n| n.fqn().clone()).collect();
        keys.iter()
            .filter_map(|key| self.workspace.remove(key))
            .collect()
    }

    /// All entries in Fqn order
    pub fn entries(&self) -> impl Iterator<Item = &WorkspaceNode> {
        self.workspace.values()
    }

    /// Number of workspace entries
    pub fn workspace_len(&self) -> usize {
        self.workspace.len()
    }

    /// True if any entry changes the committed tree
    pub fn has_changes(&self) -> bool {
        self.workspace.values().any(WorkspaceNode::is_dirty)
    }

    /// Record a subtree move performed in the workspace
    pub fn record_move(&mut self, from: Fqn, to: Fqn) {
        self.moves.push((from, to));
    }

    /// Take the recorded moves, oldest first
    pub fn take_moves(&mut self) -> Vec<(Fqn, Fqn)> {
        std::mem::take(&mut self.moves)
    }

    /// Discard the workspace and any recorded moves
    pub fn clear_workspace(&mut self) {
        self.workspace.clear();
        self.moves.clear();
    }
}
