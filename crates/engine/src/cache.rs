//! TreeCache - the cache facade
//!
//! Owns the shared tree, the lock manager, the notifier and the transaction
//! manager of one cache instance. Cheap to clone; clones share everything.
//!
//! Calls made through the cache join the transaction bound to the calling
//! thread. Without one, each call runs in a fresh thread-owned context and
//! commits immediately; a failed call is rolled back before its error is
//! returned, so a non-transactional call never leaves locks behind.

use crate::mvcc::MvccManager;
use crate::node::Node;
use crate::notification::{CacheListener, Notifier};
use crate::ops::TreeOperations;
use crate::transaction::TransactionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use treecache_concurrency::{InvocationContext, LockManager, LockMetrics};
use treecache_core::{CacheConfig, CacheResult, Fqn, LockOwner, Options};
use treecache_storage::DataContainer;

struct CacheInner {
    config: Arc<CacheConfig>,
    mvcc: Arc<MvccManager>,
    txm: TransactionManager,
}

/// A transactional tree cache
#[derive(Clone)]
pub struct TreeCache {
    inner: Arc<CacheInner>,
}

impl TreeCache {
    /// Start a cache with `config`
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the configuration is inconsistent.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let locks = LockManager::new(&config.locking);
        Ok(Self::start(config, locks))
    }

    /// Start a cache whose lock manager reports to `metrics`
    pub fn with_lock_metrics(config: CacheConfig, metrics: Arc<dyn LockMetrics>) -> CacheResult<Self> {
        config.validate()?;
        let locks = LockManager::with_metrics(&config.locking, metrics);
        Ok(Self::start(config, locks))
    }

    /// Start a cache configured from a TOML file
    pub fn from_file(path: &Path) -> CacheResult<Self> {
        Self::new(CacheConfig::from_file(path)?)
    }

    fn start(config: CacheConfig, locks: LockManager) -> Self {
        info!(
            target: "treecache::mvcc",
            isolation_level = %config.isolation_level,
            write_skew_check = config.write_skew_check,
            striping = config.locking.use_lock_striping,
            "Cache started"
        );
        let config = Arc::new(config);
        let mvcc = Arc::new(MvccManager::new(
            Arc::clone(&config),
            Arc::new(DataContainer::new()),
            Arc::new(locks),
            Arc::new(Notifier::new()),
        ));
        TreeCache {
            inner: Arc::new(CacheInner {
                config,
                txm: TransactionManager::new(Arc::clone(&mvcc)),
                mvcc,
            }),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Transaction manager of this cache
    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.inner.txm
    }

    /// Lock manager, for collaborators that lock through the same contract
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        self.inner.mvcc.lock_manager()
    }

    /// Operation surface with per-call option overrides
    pub fn with_options(&self, options: Options) -> WithOptions<'_> {
        WithOptions {
            cache: self,
            options,
        }
    }

    /// Committed node at `fqn`, bypassing every workspace and lock
    pub fn peek(&self, fqn: &Fqn) -> Option<Node> {
        self.inner
            .mvcc
            .peek(fqn)
            .map(|node| Node::new(node, self.clone()))
    }

    /// The root node
    pub fn root(&self) -> Node {
        Node::new(Arc::clone(self.inner.mvcc.container().root()), self.clone())
    }

    fn auto_commit<R, F>(&self, mut ctx: InvocationContext, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>,
    {
        let mvcc = &self.inner.mvcc;
        let result = op(mvcc, &mut ctx).and_then(|value| mvcc.commit(&mut ctx).map(|()| value));
        if result.is_err() {
            if let Err(e) = mvcc.rollback(&mut ctx) {
                warn!(target: "treecache::mvcc", error = %e, "Rollback of failed call failed");
            }
        }
        result
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener for committed changes
    pub fn add_listener(&self, listener: Arc<dyn CacheListener>) {
        self.inner.mvcc.notifier().add_listener(listener);
    }

    /// Unregister a listener; false if it was not registered
    pub fn remove_listener(&self, listener: &Arc<dyn CacheListener>) -> bool {
        self.inner.mvcc.notifier().remove_listener(listener)
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Check if anyone holds the lock of `fqn`
    pub fn is_locked(&self, fqn: &Fqn) -> bool {
        self.lock_manager().is_locked(fqn)
    }

    /// Check if `owner` holds the lock of `fqn`
    pub fn owns_lock(&self, fqn: &Fqn, owner: &LockOwner) -> bool {
        self.lock_manager().owns_lock(fqn, owner)
    }

    /// Current owner of the lock of `fqn`
    pub fn owner_of(&self, fqn: &Fqn) -> Option<LockOwner> {
        self.lock_manager().owner_of(fqn)
    }

    /// Number of locks currently held
    pub fn num_locks_held(&self) -> usize {
        self.lock_manager().num_locks_held()
    }

    /// Number of locks allocated by the lock container
    pub fn lock_container_size(&self) -> usize {
        self.lock_manager().container_size()
    }

    /// One line per held lock
    pub fn print_lock_info(&self) -> String {
        self.lock_manager().print_lock_info()
    }

    /// Indented dump of the committed tree
    pub fn print_tree(&self) -> String {
        self.inner.mvcc.container().print_tree()
    }

    /// Number of committed nodes, root included
    pub fn number_of_nodes(&self) -> usize {
        self.inner.mvcc.container().number_of_nodes()
    }

    /// Drop retained tombstones; returns how many were dropped
    pub fn purge_tombstones(&self) -> usize {
        self.inner.mvcc.container().purge_tombstones()
    }
}

impl TreeOperations for TreeCache {
    fn invoke<R, F>(&self, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>,
    {
        match self.inner.txm.current() {
            Some(tx) => tx.invoke(op),
            None => self.auto_commit(InvocationContext::for_thread(), op),
        }
    }
}

/// Operation surface of a cache with option overrides
///
/// Inside a bound transaction the overrides replace the transaction's own
/// options for each call only.
pub struct WithOptions<'a> {
    cache: &'a TreeCache,
    options: Options,
}

impl WithOptions<'_> {
    /// The overrides applied to each call
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl TreeOperations for WithOptions<'_> {
    fn invoke<R, F>(&self, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>,
    {
        match self.cache.inner.txm.current() {
            Some(tx) => tx.invoke_with(&self.options, op),
            None => {
                let mut ctx = InvocationContext::for_thread();
                ctx.set_options(self.options.clone());
                self.cache.auto_commit(ctx, op)
            }
        }
    }
}
