//! Lock manager
//!
//! Policy layer over a [`LockContainer`]. MVCC only takes write locks; reads
//! never block and never appear in a context's locked set.
//!
//! # Acquisition
//!
//! 1. The owner is the context's transaction if it has one, else its thread
//! 2. The timeout is the context's override if set, else the configured one
//! 3. A lock already recorded in the context is not acquired again
//! 4. On timeout the operation fails with `Timeout`; every lock newly taken
//!    for that same operation is released first
//!
//! # Release
//!
//! `release_all` releases every Fqn in the context's locked set and clears
//! it. It is idempotent: a second call finds the set empty.

use crate::container::{container_for, LockContainer};
use crate::context::InvocationContext;
use crate::metrics::{LockMetrics, NoopLockMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use treecache_core::{CacheError, CacheResult, Fqn, LockOwner, LockingConfig};

/// Acquires and releases write locks on behalf of invocation contexts
pub struct LockManager {
    container: Arc<dyn LockContainer>,
    default_timeout: Duration,
    lock_parent_for_child_insert_remove: bool,
    metrics: Arc<dyn LockMetrics>,
}

impl LockManager {
    /// Create a manager for the given locking configuration
    pub fn new(config: &LockingConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopLockMetrics))
    }

    /// Create a manager reporting to `metrics`
    pub fn with_metrics(config: &LockingConfig, metrics: Arc<dyn LockMetrics>) -> Self {
        LockManager {
            container: container_for(config),
            default_timeout: config.lock_acquisition_timeout(),
            lock_parent_for_child_insert_remove: config.lock_parent_for_child_insert_remove,
            metrics,
        }
    }

    /// True if parents are locked for child insert and remove
    pub fn locks_parent_for_child_insert_remove(&self) -> bool {
        self.lock_parent_for_child_insert_remove
    }

    /// Timeout applied to acquisitions made for `ctx`
    pub fn timeout_for(&self, ctx: &InvocationContext) -> Duration {
        ctx.options()
            .lock_acquisition_timeout
            .unwrap_or(self.default_timeout)
    }

    // ========================================================================
    // Acquisition
    // ========================================================================

    /// Acquire the write lock for `fqn` and record it in `ctx`
    ///
    /// Returns true if the lock was newly acquired, false if `ctx` already
    /// held it.
    ///
    /// # Errors
    ///
    /// `Timeout` if the lock could not be acquired in time.
    pub fn acquire(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<bool> {
        if ctx.holds_lock(fqn) {
            return Ok(false);
        }
        let owner = ctx.lock_owner();
        let timeout = self.timeout_for(ctx);

        if self.container.acquire(fqn, owner, timeout) {
            ctx.record_lock(fqn.clone());
            self.metrics.lock_acquired(fqn, &owner);
            debug!(target: "treecache::lock", fqn = %fqn, owner = %owner, "Lock acquired");
            Ok(true)
        } else {
            self.metrics.lock_timed_out(fqn, &owner);
            warn!(
                target: "treecache::lock",
                fqn = %fqn,
                owner = %owner,
                current = ?self.container.owner_of(fqn),
                timeout_ms = timeout.as_millis() as u64,
                "Lock acquisition timed out"
            );
            Err(CacheError::Timeout {
                fqn: fqn.clone(),
                owner,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    /// Acquire every lock in `fqns`, in order, as one unit
    ///
    /// Returns the Fqns that were newly acquired. If any acquisition fails,
    /// the locks newly taken by this call are released before the error is
    /// returned; locks the context already held are kept.
    pub fn acquire_all(&self, ctx: &mut InvocationContext, fqns: &[Fqn]) -> CacheResult<Vec<Fqn>> {
        let mut acquired = Vec::new();
        for fqn in fqns {
            match self.acquire(ctx, fqn) {
                Ok(true) => acquired.push(fqn.clone()),
                Ok(false) => {}
                Err(err) => {
                    self.release_partial(ctx, &acquired);
                    return Err(err);
                }
            }
        }
        Ok(acquired)
    }

    /// Lock `fqn` for creating or removing it as a child
    ///
    /// When parent locking is enabled the parent is locked first, then the
    /// child. Returns the newly acquired Fqns.
    pub fn acquire_for_child_insert_remove(
        &self,
        ctx: &mut InvocationContext,
        fqn: &Fqn,
    ) -> CacheResult<Vec<Fqn>> {
        let mut fqns = Vec::with_capacity(2);
        if self.lock_parent_for_child_insert_remove {
            if let Some(parent) = fqn.parent() {
                fqns.push(parent);
            }
        }
        fqns.push(fqn.clone());
        self.acquire_all(ctx, &fqns)
    }

    /// Release locks taken by a failed operation
    ///
    /// Errors are logged, not returned: the operation's own error is the one
    /// the caller needs to see.
    pub fn release_partial(&self, ctx: &mut InvocationContext, fqns: &[Fqn]) {
        for fqn in fqns.iter().rev() {
            if let Err(err) = self.release(ctx, fqn) {
                error!(target: "treecache::lock", fqn = %fqn, error = %err, "Failed to release partial lock");
            }
        }
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Release one lock held by `ctx`
    ///
    /// # Errors
    ///
    /// `IllegalMonitorState` if the context's owner does not hold the lock.
    pub fn release(&self, ctx: &mut InvocationContext, fqn: &Fqn) -> CacheResult<()> {
        let owner = ctx.lock_owner();
        ctx.forget_lock(fqn);
        self.release_for(fqn, owner)
    }

    /// Release every lock held by `ctx` and clear its locked set
    ///
    /// Every lock is attempted even if one release fails; the first failure
    /// is returned.
    pub fn release_all(&self, ctx: &mut InvocationContext) -> CacheResult<()> {
        let owner = ctx.lock_owner();
        let fqns = ctx.take_locked_fqns();
        if !fqns.is_empty() {
            debug!(target: "treecache::lock", owner = %owner, count = fqns.len(), "Releasing all locks");
        }
        let mut first_error = None;
        for fqn in &fqns {
            if let Err(err) = self.release_for(fqn, owner) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn release_for(&self, fqn: &Fqn, owner: LockOwner) -> CacheResult<()> {
        match self.container.release(fqn, owner) {
            Ok(()) => {
                self.metrics.lock_released(fqn, &owner);
                debug!(target: "treecache::lock", fqn = %fqn, owner = %owner, "Lock released");
                Ok(())
            }
            Err(err) => {
                self.metrics.illegal_release(fqn, &owner);
                error!(
                    target: "treecache::lock",
                    fqn = %fqn,
                    owner = %owner,
                    current = ?self.container.owner_of(fqn),
                    "Lock released by non-owner"
                );
                Err(err)
            }
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// True if anyone holds the lock for `fqn`
    pub fn is_locked(&self, fqn: &Fqn) -> bool {
        self.container.is_locked(fqn)
    }

    /// True if `owner` holds the lock for `fqn`
    pub fn owns_lock(&self, fqn: &Fqn, owner: &LockOwner) -> bool {
        self.container.owns_lock(fqn, owner)
    }

    /// Current owner of the lock for `fqn`
    pub fn owner_of(&self, fqn: &Fqn) -> Option<LockOwner> {
        self.container.owner_of(fqn)
    }

    /// Number of locks currently held across all owners
    pub fn num_locks_held(&self) -> usize {
        self.container.num_locks_held()
    }

    /// Number of lock objects currently allocated
    pub fn container_size(&self) -> usize {
        self.container.size()
    }

    /// One line per held lock
    pub fn print_lock_info(&self) -> String {
        self.container.lock_info()
    }
}
