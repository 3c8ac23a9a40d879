//! TreeOperations trait - the tree operation surface
//!
//! Every way of running operations against a cache implements this trait:
//!
//! - [`TreeCache`](crate::TreeCache): joins the transaction bound to the
//!   calling thread, or runs each call in a fresh thread-owned context that
//!   commits immediately
//! - [`Transaction`](crate::Transaction): runs in that transaction's context,
//!   from whichever thread holds the handle
//! - [`WithOptions`](crate::WithOptions): either of the above with per-call
//!   option overrides
//!
//! ## Usage
//!
//! ```text
//! let cache = TreeCache::new(CacheConfig::new())?;
//! let txm = cache.transaction_manager();
//!
//! txm.begin()?;
//! cache.put(&"/a/b".parse()?, "k", Value::from("v"))?;
//! cache.move_node(&"/a/b".parse()?, &"/c".parse()?, true)?;
//! txm.commit()?;
//! ```

use crate::mvcc::MvccManager;
use std::collections::BTreeSet;
use treecache_concurrency::InvocationContext;
use treecache_core::{CacheResult, Fqn, NodeData, Value};

/// Operations on the tree, run through the MVCC manager
///
/// Implementors provide [`invoke`](TreeOperations::invoke), which supplies the
/// invocation context; every operation is a provided method on top of it.
pub trait TreeOperations {
    /// Run `op` against the context this handle operates in
    fn invoke<R, F>(&self, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>;

    // =========================================================================
    // Reads
    // =========================================================================

    /// One data entry; None if the node or key is absent
    fn get(&self, fqn: &Fqn, key: &str) -> CacheResult<Option<Value>> {
        self.invoke(|mvcc, ctx| mvcc.get(ctx, fqn, key))
    }

    /// The node's data map; None if the node is absent
    fn get_data(&self, fqn: &Fqn) -> CacheResult<Option<NodeData>> {
        self.invoke(|mvcc, ctx| mvcc.get_data(ctx, fqn))
    }

    /// The node's data keys; None if the node is absent
    fn get_keys(&self, fqn: &Fqn) -> CacheResult<Option<BTreeSet<String>>> {
        self.invoke(|mvcc, ctx| mvcc.get_keys(ctx, fqn))
    }

    /// Names of the node's children; None if the node is absent
    fn get_children_names(&self, fqn: &Fqn) -> CacheResult<Option<BTreeSet<String>>> {
        self.invoke(|mvcc, ctx| mvcc.get_children_names(ctx, fqn))
    }

    /// Check if the node exists
    fn exists(&self, fqn: &Fqn) -> CacheResult<bool> {
        self.invoke(|mvcc, ctx| mvcc.exists(ctx, fqn))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set one data entry, creating the node and its missing ancestors
    fn put(&self, fqn: &Fqn, key: &str, value: Value) -> CacheResult<Option<Value>> {
        self.invoke(|mvcc, ctx| mvcc.put(ctx, fqn, key, value))
    }

    /// Merge `data` into the node's data
    fn put_all(&self, fqn: &Fqn, data: NodeData) -> CacheResult<()> {
        self.invoke(|mvcc, ctx| mvcc.put_all(ctx, fqn, data))
    }

    /// Replace the node's data with `data`
    fn put_replace_all(&self, fqn: &Fqn, data: NodeData) -> CacheResult<()> {
        self.invoke(|mvcc, ctx| mvcc.put_replace_all(ctx, fqn, data))
    }

    /// Remove one data entry
    fn remove_key(&self, fqn: &Fqn, key: &str) -> CacheResult<Option<Value>> {
        self.invoke(|mvcc, ctx| mvcc.remove_key(ctx, fqn, key))
    }

    /// Empty the node's data
    fn clear_data(&self, fqn: &Fqn) -> CacheResult<()> {
        self.invoke(|mvcc, ctx| mvcc.clear_data(ctx, fqn))
    }

    /// Remove the node and its subtree; false if it did not exist
    fn remove_node(&self, fqn: &Fqn) -> CacheResult<bool> {
        self.invoke(|mvcc, ctx| mvcc.remove_node(ctx, fqn))
    }

    /// Move `source` under `new_parent`; returns the new Fqn
    ///
    /// `deep` also locks every descendant; see [`MvccManager::move_node`].
    fn move_node(&self, source: &Fqn, new_parent: &Fqn, deep: bool) -> CacheResult<Option<Fqn>> {
        self.invoke(|mvcc, ctx| mvcc.move_node(ctx, source, new_parent, deep))
    }
}
