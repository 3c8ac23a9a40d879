//! MVCC orchestration of tree operations
//!
//! Every read and write runs against an [`InvocationContext`]:
//!
//! - Writes take write locks first, then copy the committed node into the
//!   context's workspace and mutate the copy
//! - Reads never lock. Under READ_COMMITTED they see the latest committed
//!   node; under REPEATABLE_READ the first read pins a copy (or a "no node"
//!   marker) that every later read in the context returns
//! - Commit validates the workspace, merges it into the shared tree under one
//!   version stamp, emits notifications and releases the locks. Validation
//!   and merge run inside the container's commit guard, so a parent that
//!   passed validation is still there when its children are merged
//! - Rollback discards the workspace and releases the locks
//!
//! # Operation Structure
//!
//! Each write acquires every lock it needs before touching the workspace. If
//! the set of needed locks changes while waiting (a concurrent commit created
//! or removed nodes), the newly needed ones are taken too, until stable. If
//! any step fails, the locks this operation took are released before the
//! error is returned; locks from earlier operations stay with the context.

use crate::notification::{CacheEvent, MoveEvent, NodeEvent, Notifier};
use std::collections::BTreeSet;
use std::slice;
use std::sync::Arc;
use tracing::{debug, warn};
use treecache_concurrency::validation::dirty_entries;
use treecache_concurrency::{validate_workspace, InvocationContext, LockManager, WorkspaceNode};
use treecache_core::{
    CacheConfig, CacheError, CacheResult, DataVersion, Fqn, IsolationLevel, NodeData, Value,
};
use treecache_storage::{DataContainer, VersionedNode};

/// Where a Fqn resolves in one context's view
enum Location {
    /// Present in the workspace
    Workspace,
    /// Committed node without a workspace entry
    Committed(Arc<VersionedNode>),
    /// No committed node and nothing in the workspace
    Missing,
    /// Hidden or removed by the workspace
    Absent,
}

impl Location {
    fn is_present(&self) -> bool {
        matches!(self, Location::Workspace | Location::Committed(_))
    }
}

/// Runs tree operations against invocation contexts
pub struct MvccManager {
    config: Arc<CacheConfig>,
    container: Arc<DataContainer>,
    locks: Arc<LockManager>,
    notifier: Arc<Notifier>,
}

impl MvccManager {
    /// Create a manager over a shared tree
    pub fn new(
        config: Arc<CacheConfig>,
        container: Arc<DataContainer>,
        locks: Arc<LockManager>,
        notifier: Arc<Notifier>,
    ) -> Self {
        MvccManager {
            config,
            container,
            locks,
            notifier,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The shared, committed tree
    pub fn container(&self) -> &Arc<DataContainer> {
        &self.container
    }

    /// The lock manager
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// The notifier commits report to
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    fn repeatable_read(&self) -> bool {
        self.config.isolation_level == IsolationLevel::RepeatableRead
    }

    // ========================================================================
    // View resolution
    // ========================================================================

    fn locate(&self, ctx: &InvocationContext, fqn: &Fqn) -> Location {
        // A created ancestor hides whatever is committed below it
        let mut shadowed = false;
        for ancestor in fqn.ancestors() {
            if let Some(entry) = ctx.lookup(&ancestor) {
                if !entry.is_present() {
                    return Location::Absent;
                }
                shadowed |= entry.is_created();
            }
        }
        match ctx.lookup(fqn) {
            Some(entry) if entry.is_present() => Location::Workspace,
            Some(_) => Location::Absent,
            None if shadowed => Location::Absent,
            None => match self.container.peek(fqn) {
                Some(node) => Location::Committed(node),
                None => Location::Missing,
            },
        }
    }

    fn exists_in_view(&self, ctx: &InvocationContext, fqn: &Fqn) -> bool {
        self.locate(ctx, fqn).is_present()
    }

    fn children_in_view(
        &self,
        ctx: &InvocationContext,
        fqn: &Fqn,
        location: &Location,
    ) -> Option<BTreeSet<String>> {
        let mut names = match location {
            Location::Workspace => {
                let entry = ctx.lookup(fqn)?;
                if entry.is_created() {
                    BTreeSet::new()
                } else if self.repeatable_read() {
                    entry.pinned_children().clone()
                } else {
                    self.container
                        .peek(fqn)
                        .and_then(|node| node.children_names().ok())
                        .unwrap_or_default()
                }
            }
            Location::Committed(node) => node.children_names().unwrap_or_default(),
            Location::Missing | Location::Absent => return None,
        };
        for child in ctx.direct_children(fqn) {
            if let Some(name) = child.fqn().last_element() {
                if child.is_present() {
                    names.insert(name.to_string());
                } else {
                    names.remove(name);
                }
            }
        }
        Some(names)
    }

    fn data_in_view(&self, ctx: &InvocationContext, fqn: &Fqn, location: &Location) -> Option<NodeData> {
        match location {
            Location::Workspace => ctx.lookup(fqn).map(|entry| entry.data().clone()),
            Location::Committed(node) => node.data().ok(),
            Location::Missing | Location::Absent => None,
        }
    }

    /// Strict descendants of `fqn` visible to `ctx`, parents first
    fn visible_descendants(&self, ctx: &InvocationContext, fqn: &Fqn) -> Vec<Fqn> {
        let mut out = Vec::new();
        let mut stack = vec![fqn.clone()];
        while let Some(current) = stack.pop() {
            let location = self.locate(ctx, &current);
            let Some(names) = self.children_in_view(ctx, &current, &location) else {
                continue;
            };
            if current != *fqn {
                out.push(current.clone());
            }
            stack.extend(names.into_iter().rev().map(|name| current.child(name)));
        }
        out
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn prepare_read(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<Location> {
        if ctx.options().force_write_lock {
            let mut taken = Vec::new();
            if !self.lock_all(ctx, slice::from_ref(fqn), &mut taken)? {
                return Ok(Location::Absent);
            }
            self.materialize(ctx, fqn);
        }

        let location = self.locate(ctx, fqn);
        if !self.repeatable_read() {
            return Ok(location);
        }
        Ok(match location {
            Location::Committed(node) => self.pin(ctx, fqn, node),
            Location::Missing => {
                ctx.insert(WorkspaceNode::absent(fqn.clone()));
                debug!(target: "treecache::mvcc", fqn = %fqn, "Pinned no-node marker");
                Location::Absent
            }
            other => other,
        })
    }

    fn pin(&self, ctx: &mut InvocationContext, fqn: &Fqn, node: Arc<VersionedNode>) -> Location {
        match node.snapshot() {
            Ok(snapshot) => {
                debug!(target: "treecache::mvcc", fqn = %fqn, version = %snapshot.version, "Pinned read copy");
                ctx.insert(WorkspaceNode::from_snapshot(snapshot, node));
                Location::Workspace
            }
            // Removed between lookup and snapshot
            Err(_) => {
                ctx.insert(WorkspaceNode::absent(fqn.clone()));
                Location::Absent
            }
        }
    }

    /// One data entry of `fqn`; None if the node or key is absent
    pub fn get(&self, ctx: &mut InvocationContext, fqn: &Fqn, key: &str) -> CacheResult<Option<Value>> {
        let location = self.prepare_read(ctx, fqn)?;
        Ok(match &location {
            Location::Workspace => ctx.lookup(fqn).and_then(|entry| entry.data().get(key).cloned()),
            Location::Committed(node) => node.get(key).ok().flatten(),
            Location::Missing | Location::Absent => None,
        })
    }

    /// Data map of `fqn`; None if the node is absent
    pub fn get_data(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<Option<NodeData>> {
        let location = self.prepare_read(ctx, fqn)?;
        Ok(self.data_in_view(ctx, fqn, &location))
    }

    /// Data keys of `fqn`; None if the node is absent
    pub fn get_keys(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
    ) -> CacheResult<Option<BTreeSet<String>>> {
        let location = self.prepare_read(ctx, fqn)?;
        Ok(match &location {
            Location::Workspace => ctx
                .lookup(fqn)
                .map(|entry| entry.data().keys().cloned().collect()),
            Location::Committed(node) => node.keys().ok(),
            Location::Missing | Location::Absent => None,
        })
    }

    /// Names of the children of `fqn`; None if the node is absent
    pub fn get_children_names(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
    ) -> CacheResult<Option<BTreeSet<String>>> {
        let location = self.prepare_read(ctx, fqn)?;
        Ok(self.children_in_view(ctx, fqn, &location))
    }

    /// True if `fqn` exists in the context's view
    pub fn exists(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<bool> {
        Ok(self.prepare_read(ctx, fqn)?.is_present())
    }

    /// Committed node at `fqn`, ignoring every workspace
    pub fn peek(&self, fqn: &Fqn) -> Option<Arc<VersionedNode>> {
        self.container.peek(fqn)
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Acquire `fqns` for `ctx`, adding new ones to `taken`
    ///
    /// Returns false when the operation must become a no-op: a timeout under
    /// `fail_silently`. Every lock in `taken` is released on any failure.
    fn lock_all(
        &self,
        ctx: &mut InvocationContext,
        fqns: &[Fqn],
        taken: &mut Vec<Fqn>,
    ) -> CacheResult<bool> {
        if ctx.options().skip_locking {
            return Ok(true);
        }
        match self.locks.acquire_all(ctx, fqns) {
            Ok(acquired) => {
                taken.extend(acquired);
                Ok(true)
            }
            Err(err) => {
                self.locks.release_partial(ctx, taken);
                taken.clear();
                if err.is_timeout() && ctx.options().fail_silently {
                    debug!(target: "treecache::mvcc", error = %err, "Lock timeout ignored");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Lock whatever `needed` reports until it reports nothing new
    fn lock_until_stable<F>(
        &self,
        ctx: &mut InvocationContext,
        taken: &mut Vec<Fqn>,
        needed: F,
    ) -> CacheResult<bool>
    where
        F: Fn(&InvocationContext) -> Vec<Fqn>,
    {
        if ctx.options().skip_locking {
            return Ok(true);
        }
        loop {
            let missing: Vec<Fqn> = needed(ctx)
                .into_iter()
                .filter(|fqn| !ctx.holds_lock(fqn))
                .collect();
            if missing.is_empty() {
                return Ok(true);
            }
            if !self.lock_all(ctx, &missing, taken)? {
                return Ok(false);
            }
        }
    }

    /// Nodes a write to `fqn` has to create, top-down; empty if it exists
    fn missing_chain(&self, ctx: &InvocationContext, fqn: &Fqn) -> Vec<Fqn> {
        let mut chain: Vec<Fqn> = fqn.ancestors().into_iter().skip(1).collect();
        chain.push(fqn.clone());
        match chain.iter().position(|f| !self.exists_in_view(ctx, f)) {
            Some(first) => chain.split_off(first),
            None => Vec::new(),
        }
    }

    fn parent_lock(&self, fqn: &Fqn) -> Option<Fqn> {
        if self.locks.locks_parent_for_child_insert_remove() {
            fqn.parent()
        } else {
            None
        }
    }

    fn write_locks(&self, ctx: &InvocationContext, fqn: &Fqn, create: bool) -> Vec<Fqn> {
        let chain = if create {
            self.missing_chain(ctx, fqn)
        } else {
            Vec::new()
        };
        let Some(top) = chain.first().cloned() else {
            return vec![fqn.clone()];
        };
        self.parent_lock(&top).into_iter().chain(chain).collect()
    }

    fn remove_locks(&self, ctx: &InvocationContext, fqn: &Fqn) -> Vec<Fqn> {
        let mut fqns: Vec<Fqn> = self.parent_lock(fqn).into_iter().collect();
        fqns.push(fqn.clone());
        fqns.extend(self.visible_descendants(ctx, fqn));
        fqns
    }

    // ========================================================================
    // Workspace materialization
    // ========================================================================

    /// Give `fqn` a writable workspace entry; false if it is absent
    fn materialize(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> bool {
        let present = match self.locate(ctx, fqn) {
            Location::Workspace => true,
            Location::Committed(node) => match node.snapshot() {
                Ok(snapshot) => {
                    debug!(target: "treecache::mvcc", fqn = %fqn, version = %snapshot.version, "Workspace copy created");
                    ctx.insert(WorkspaceNode::from_snapshot(snapshot, node));
                    true
                }
                Err(_) => false,
            },
            Location::Missing | Location::Absent => false,
        };
        if present && ctx.holds_lock(fqn) {
            if let Some(entry) = ctx.lookup_mut(fqn) {
                entry.mark_locked();
            }
        }
        present
    }

    /// Reject reviving a tombstone with an explicit version that is not newer
    fn check_revival(&self, ctx: &InvocationContext, fqn: &Fqn) -> CacheResult<()> {
        let Some(version) = ctx.options().data_version else {
            return Ok(());
        };
        match self.container.tombstone_version(fqn) {
            Some(tombstone) if !version.newer_than(&tombstone) => Err(CacheError::DataVersioning {
                fqn: fqn.clone(),
                message: format!(
                    "version {} does not supersede removal at {}",
                    version, tombstone
                ),
            }),
            _ => Ok(()),
        }
    }

    fn create_entry(&self, ctx: &mut InvocationContext, fqn: &Fqn) {
        if let Some(entry) = ctx.lookup_mut(fqn) {
            entry.recreate();
        } else {
            ctx.insert(WorkspaceNode::created(fqn.clone()));
        }
        if ctx.holds_lock(fqn) {
            if let Some(entry) = ctx.lookup_mut(fqn) {
                entry.mark_locked();
            }
        }
        debug!(target: "treecache::mvcc", fqn = %fqn, "Node created in workspace");
    }

    fn materialize_chain(&self, ctx: &mut InvocationContext, fqn: &Fqn, create: bool) -> CacheResult<bool> {
        if create {
            let chain = self.missing_chain(ctx, fqn);
            for f in &chain {
                self.check_revival(ctx, f)?;
            }
            for f in &chain {
                self.create_entry(ctx, f);
            }
        }
        Ok(self.materialize(ctx, fqn))
    }

    /// Lock and materialize `fqn` for writing
    ///
    /// Returns false if the node is absent and `create` is false, or if the
    /// operation became a no-op under `fail_silently`.
    fn prepare_write(&self, ctx: &mut InvocationContext, fqn: &Fqn, create: bool) -> CacheResult<bool> {
        let mut taken = Vec::new();
        if !self.lock_until_stable(ctx, &mut taken, |ctx| self.write_locks(ctx, fqn, create))? {
            return Ok(false);
        }
        let result = self.materialize_chain(ctx, fqn, create);
        if result.is_err() {
            self.locks.release_partial(ctx, &taken);
        }
        result
    }

    fn entry_mut<'a>(
        &self,
        ctx: &'a mut InvocationContext,
        fqn: &Fqn,
    ) -> CacheResult<&'a mut WorkspaceNode> {
        ctx.lookup_mut(fqn)
            .ok_or_else(|| CacheError::node_not_exists(fqn))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Set one data entry, creating the node and missing ancestors
    ///
    /// Returns the previous value.
    pub fn put(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
        key: &str,
        value: Value,
    ) -> CacheResult<Option<Value>> {
        if !self.prepare_write(ctx, fqn, true)? {
            return Ok(None);
        }
        Ok(self.entry_mut(ctx, fqn)?.put(key.to_string(), value))
    }

    /// Merge `data` into the node, creating it if needed
    pub fn put_all(&self, ctx: &mut InvocationContext, fqn: &Fqn, data: NodeData) -> CacheResult<()> {
        if self.prepare_write(ctx, fqn, true)? {
            self.entry_mut(ctx, fqn)?.put_all(data);
        }
        Ok(())
    }

    /// Replace the node's data with `data`, creating the node if needed
    pub fn put_replace_all(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
        data: NodeData,
    ) -> CacheResult<()> {
        if self.prepare_write(ctx, fqn, true)? {
            self.entry_mut(ctx, fqn)?.replace_data(data);
        }
        Ok(())
    }

    /// Remove one data entry; returns the previous value
    pub fn remove_key(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
        key: &str,
    ) -> CacheResult<Option<Value>> {
        if !self.prepare_write(ctx, fqn, false)? {
            return Ok(None);
        }
        Ok(self.entry_mut(ctx, fqn)?.remove_key(key))
    }

    /// Empty the node's data map
    pub fn clear_data(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<()> {
        if self.prepare_write(ctx, fqn, false)? {
            self.entry_mut(ctx, fqn)?.clear_data();
        }
        Ok(())
    }

    /// Remove the node and its whole visible subtree
    ///
    /// Removing the root removes all of its children and clears its data.
    /// Returns false if the node did not exist.
    pub fn remove_node(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<bool> {
        if fqn.is_root() {
            return self.remove_root(ctx);
        }
        let mut taken = Vec::new();
        if !self.lock_until_stable(ctx, &mut taken, |ctx| self.remove_locks(ctx, fqn))? {
            return Ok(false);
        }
        if !self.materialize(ctx, fqn) {
            return Ok(false);
        }
        let dropped = ctx.remove_descendants(fqn).len();
        if let Some(entry) = ctx.lookup_mut(fqn) {
            entry.mark_removed();
        }
        debug!(target: "treecache::mvcc", fqn = %fqn, dropped, "Node removed in workspace");
        Ok(true)
    }

    fn remove_root(&self, ctx: &mut InvocationContext) -> CacheResult<bool> {
        let root = Fqn::root();
        let location = self.locate(ctx, &root);
        let children = self
            .children_in_view(ctx, &root, &location)
            .unwrap_or_default();
        for name in children {
            self.remove_node(ctx, &root.child(name))?;
        }
        self.clear_data(ctx, &root)?;
        Ok(true)
    }

    /// Move `source` to become a child of `new_parent`
    ///
    /// A deep move also locks every descendant of `source` and every new Fqn
    /// under the destination; a shallow move locks only the moved root and
    /// the destination. Returns the new Fqn of the subtree root, or None if
    /// the move became a no-op under `fail_silently`.
    ///
    /// # Errors
    ///
    /// `NodeNotExists` if `source` or `new_parent` does not exist; only the
    /// locks needed to discover that are taken, and they are released.
    pub fn move_node(
        &self,
        ctx: &mut InvocationContext,
        source: &Fqn,
        new_parent: &Fqn,
        deep: bool,
    ) -> CacheResult<Option<Fqn>> {
        let name = source
            .last_element()
            .ok_or_else(|| CacheError::invalid_operation("the root node cannot be moved"))?;
        if new_parent.is_descendant_of_or_equal(source) {
            return Err(CacheError::invalid_operation(format!(
                "cannot move {} under itself ({})",
                source, new_parent
            )));
        }
        let target = new_parent.child(name);
        if target == *source {
            return Ok(Some(target));
        }
        if source.is_descendant_of(&target) {
            return Err(CacheError::invalid_operation(format!(
                "moving {} to {} would replace its own ancestor",
                source, target
            )));
        }

        let mut taken = Vec::new();
        let source_locks: Vec<Fqn> = self
            .parent_lock(source)
            .into_iter()
            .chain(std::iter::once(source.clone()))
            .collect();
        if !self.lock_all(ctx, &source_locks, &mut taken)? {
            return Ok(None);
        }
        if !self.exists_in_view(ctx, source) {
            self.locks.release_partial(ctx, &taken);
            return Err(CacheError::node_not_exists(source));
        }
        if !self.lock_all(ctx, slice::from_ref(new_parent), &mut taken)? {
            return Ok(None);
        }
        if !self.exists_in_view(ctx, new_parent) {
            self.locks.release_partial(ctx, &taken);
            return Err(CacheError::node_not_exists(new_parent));
        }

        let locked = self.lock_until_stable(ctx, &mut taken, |ctx| {
            self.move_locks(ctx, source, &target, deep)
        })?;
        if !locked {
            return Ok(None);
        }
        match self.apply_move(ctx, source, &target) {
            Ok(()) => {
                debug!(target: "treecache::mvcc", from = %source, to = %target, deep, "Node moved in workspace");
                Ok(Some(target))
            }
            Err(err) => {
                self.locks.release_partial(ctx, &taken);
                Err(err)
            }
        }
    }

    fn move_locks(&self, ctx: &InvocationContext, source: &Fqn, target: &Fqn, deep: bool) -> Vec<Fqn> {
        let mut fqns = vec![target.clone()];
        if self.exists_in_view(ctx, target) {
            fqns.extend(self.visible_descendants(ctx, target));
        }
        if deep {
            let below = self.visible_descendants(ctx, source);
            fqns.extend(
                below
                    .iter()
                    .filter_map(|fqn| fqn.replace_ancestor(source, target)),
            );
            fqns.extend(below);
        }
        fqns
    }

    fn apply_move(&self, ctx: &mut InvocationContext, source: &Fqn, target: &Fqn) -> CacheResult<()> {
        // Copy the visible subtree, parents first
        let mut nodes = Vec::new();
        for fqn in std::iter::once(source.clone()).chain(self.visible_descendants(ctx, source)) {
            let location = self.locate(ctx, &fqn);
            if let (Some(data), Some(moved)) = (
                self.data_in_view(ctx, &fqn, &location),
                fqn.replace_ancestor(source, target),
            ) {
                nodes.push((moved, data));
            }
        }
        for (moved, _) in &nodes {
            self.check_revival(ctx, moved)?;
        }

        if self.exists_in_view(ctx, target) {
            self.remove_node(ctx, target)?;
        }
        for (moved, data) in nodes {
            self.create_entry(ctx, &moved);
            self.entry_mut(ctx, &moved)?.replace_data(data);
        }

        if self.materialize(ctx, source) {
            ctx.remove_descendants(source);
            if let Some(entry) = ctx.lookup_mut(source) {
                entry.mark_removed();
            }
        }
        ctx.record_move(source.clone(), target.clone());
        Ok(())
    }

    // ========================================================================
    // Commit / rollback
    // ========================================================================

    /// Validate and merge the workspace, then release every lock
    ///
    /// On a validation failure nothing is merged and the locks stay held;
    /// the caller must roll back.
    pub fn commit(&self, ctx: &mut InvocationContext) -> CacheResult<()> {
        let gtx = ctx.global_transaction();
        if ctx.has_changes() {
            let structural = dirty_entries(ctx).any(WorkspaceNode::replaces_base);
            let guard = self.container.begin_commit(structural);
            let validation = validate_workspace(
                ctx,
                &self.container,
                self.config.write_skew_check_active(),
            );
            if !validation.is_valid() {
                warn!(
                    target: "treecache::mvcc",
                    gtx = ?gtx,
                    conflicts = validation.conflict_count(),
                    first = ?validation.conflicts.first(),
                    "Commit validation failed"
                );
                return validation.into_result();
            }

            let version = match ctx.options().data_version {
                Some(version) => version,
                None => self.container.allocate_version(),
            };
            let events = self.merge(ctx, version)?;
            drop(guard);
            debug!(target: "treecache::mvcc", gtx = ?gtx, version = %version, changes = events.len(), structural, "Workspace merged");
            self.notifier.emit(&events);
        }

        ctx.clear_workspace();
        let released = self.locks.release_all(ctx);
        if let Some(gtx) = gtx {
            self.notifier.transaction_completed(gtx, true);
        }
        released
    }

    fn merge(&self, ctx: &mut InvocationContext, version: DataVersion) -> CacheResult<Vec<CacheEvent>> {
        let gtx = ctx.global_transaction();
        let local = ctx.options().cache_mode_local;
        let mut events = Vec::new();

        for entry in dirty_entries(ctx) {
            let fqn = entry.fqn();
            let event = |before: Option<NodeData>, after: Option<NodeData>| NodeEvent {
                fqn: fqn.clone(),
                before,
                after,
                gtx,
                cache_mode_local: local,
            };

            if entry.is_removed() {
                if entry.replaces_base() && self.container.remove(fqn, version)?.is_some() {
                    events.push(CacheEvent::Removed(event(entry.original().cloned(), None)));
                }
            } else if entry.is_created() {
                if entry.replaces_base() {
                    if let Some(before) = entry.original() {
                        events.push(CacheEvent::Removed(event(Some(before.clone()), None)));
                    }
                    self.container
                        .install_fresh(fqn, entry.data().clone(), version)?;
                } else if let Some(existing) = self.container.peek(fqn) {
                    // Committed since this context saw no node: keep it and
                    // its data, adding only the entries written here
                    if entry.is_changed() {
                        let before = existing.data()?;
                        let mut after = before.clone();
                        after.extend(entry.data().clone());
                        self.container.update(fqn, after.clone(), version)?;
                        events.push(CacheEvent::Modified(event(Some(before), Some(after))));
                    }
                    continue;
                } else {
                    self.container
                        .install_fresh(fqn, entry.data().clone(), version)?;
                }
                events.push(CacheEvent::Created(event(None, Some(entry.data().clone()))));
            } else if entry.is_changed() {
                self.container.update(fqn, entry.data().clone(), version)?;
                events.push(CacheEvent::Modified(event(
                    entry.original().cloned(),
                    Some(entry.data().clone()),
                )));
            }
        }

        for (from, to) in ctx.take_moves() {
            events.push(CacheEvent::Moved(MoveEvent {
                from,
                to,
                gtx,
                cache_mode_local: local,
            }));
        }
        Ok(events)
    }

    /// Discard the workspace and release every lock
    pub fn rollback(&self, ctx: &mut InvocationContext) -> CacheResult<()> {
        let discarded = ctx.workspace_len();
        ctx.clear_workspace();
        let released = self.locks.release_all(ctx);
        if let Some(gtx) = ctx.global_transaction() {
            debug!(target: "treecache::mvcc", gtx = %gtx, discarded, "Workspace discarded");
            self.notifier.transaction_completed(gtx, false);
        }
        released
    }
}
