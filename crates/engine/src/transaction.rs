//! Transaction lifecycle and thread binding
//!
//! A [`Transaction`] is an explicit, cloneable handle to one invocation
//! context owned by a [`GlobalTransaction`]. It can run operations itself,
//! from any thread, or be bound to the calling thread by the
//! [`TransactionManager`] so that plain [`TreeCache`](crate::TreeCache) calls
//! join it.
//!
//! The thread binding is only a convenience cache of "current handle":
//! `suspend()` hands the handle out, `resume()` binds it to another thread,
//! and the locks it holds follow it because they are owned by the
//! transaction, not by a thread.
//!
//! # Lock Order
//!
//! A handle's context mutex is taken before its status mutex. Operations hold
//! only the context while they run, so `status()` never waits on a lock
//! acquisition in progress.
//!
//! # Memory Ordering
//!
//! The metric counters use Relaxed ordering; they are observational and do
//! not synchronize any other memory.

use crate::mvcc::MvccManager;
use crate::ops::TreeOperations;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use treecache_concurrency::{InvocationContext, SharedContext};
use treecache_core::{CacheError, CacheResult, GlobalTransaction, Options};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Transaction bound to this thread, per manager
    static BOUND: RefCell<FxHashMap<u64, Transaction>> = RefCell::new(FxHashMap::default());
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting operations
    Active,
    /// Commit failed; only rollback is allowed
    MarkedRollback,
    /// Merged into the shared tree
    Committed,
    /// Discarded
    RolledBack,
}

impl TransactionStatus {
    /// True once committed or rolled back
    pub fn is_completed(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::MarkedRollback => write!(f, "marked for rollback"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// State shared by a manager and every transaction it started
pub(crate) struct ManagerShared {
    id: u64,
    mvcc: Arc<MvccManager>,
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    write_skew_aborts: AtomicU64,
}

impl ManagerShared {
    fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_end(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    fn record_commit(&self) {
        self.record_end();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rollback(&self) {
        self.record_end();
        self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
    }
}

struct TransactionInner {
    gtx: GlobalTransaction,
    status: Mutex<TransactionStatus>,
    context: SharedContext,
    shared: Arc<ManagerShared>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if self.status.get_mut().is_completed() {
            return;
        }
        warn!(target: "treecache::txn", gtx = %self.gtx, "Transaction dropped while active, rolling back");
        let mut ctx = self.context.lock();
        if let Err(e) = self.shared.mvcc.rollback(&mut ctx) {
            warn!(target: "treecache::txn", gtx = %self.gtx, error = %e, "Rollback of dropped transaction failed");
        }
        self.shared.record_rollback();
    }
}

/// Handle to one transaction
///
/// Clones share the same transaction. The handle is `Send`, so a transaction
/// can be started on one thread and finished on another. Dropping the last
/// handle of a transaction that never completed rolls it back.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    fn new(shared: Arc<ManagerShared>) -> Self {
        let gtx = GlobalTransaction::next();
        Transaction {
            inner: Arc::new(TransactionInner {
                gtx,
                status: Mutex::new(TransactionStatus::Active),
                context: InvocationContext::for_transaction(gtx).into_shared(),
                shared,
            }),
        }
    }

    /// Transaction identity (also its lock owner)
    pub fn gtx(&self) -> GlobalTransaction {
        self.inner.gtx
    }

    /// Current lifecycle state
    pub fn status(&self) -> TransactionStatus {
        *self.inner.status.lock()
    }

    /// True while operations are accepted
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// True if both handles refer to the same transaction
    pub fn same_as(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn not_active(&self, status: TransactionStatus) -> CacheError {
        CacheError::TransactionNotActive {
            gtx: self.inner.gtx,
            state: status.to_string(),
        }
    }

    /// Validate and merge the workspace, then release every lock
    ///
    /// # Errors
    ///
    /// On a validation failure (write skew, missing parent) nothing is merged,
    /// the locks stay held and the transaction is marked for rollback; the
    /// caller must call [`rollback`](Transaction::rollback).
    pub fn commit(&self) -> CacheResult<()> {
        let mut ctx = self.inner.context.lock();
        let mut status = self.inner.status.lock();
        if *status != TransactionStatus::Active {
            return Err(self.not_active(*status));
        }

        let shared = &self.inner.shared;
        match shared.mvcc.commit(&mut ctx) {
            Ok(()) => {
                *status = TransactionStatus::Committed;
                shared.record_commit();
                info!(target: "treecache::txn", gtx = %self.inner.gtx, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                // A failure after the merge (lock release) still counts as committed
                if ctx.has_changes() {
                    *status = TransactionStatus::MarkedRollback;
                    if e.is_write_skew() {
                        shared.write_skew_aborts.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(target: "treecache::txn", gtx = %self.inner.gtx, error = %e, "Transaction commit rejected");
                } else {
                    *status = TransactionStatus::Committed;
                    shared.record_commit();
                    warn!(target: "treecache::txn", gtx = %self.inner.gtx, error = %e, "Transaction committed with errors");
                }
                Err(e)
            }
        }
    }

    /// Discard the workspace and release every lock
    pub fn rollback(&self) -> CacheResult<()> {
        let mut ctx = self.inner.context.lock();
        let mut status = self.inner.status.lock();
        if status.is_completed() {
            return Err(self.not_active(*status));
        }
        *status = TransactionStatus::RolledBack;
        drop(status);

        let shared = &self.inner.shared;
        shared.record_rollback();
        warn!(target: "treecache::txn", gtx = %self.inner.gtx, locks = ctx.num_locks(), "Transaction rolled back");
        shared.mvcc.rollback(&mut ctx)
    }

    /// Set option overrides for every later operation of this transaction
    pub fn set_options(&self, options: Options) {
        self.inner.context.lock().set_options(options);
    }

    /// Reset option overrides
    pub fn clear_options(&self) {
        self.inner.context.lock().clear_options();
    }

    /// Current option overrides
    pub fn options(&self) -> Options {
        self.inner.context.lock().options().clone()
    }

    /// Number of locks this transaction holds
    pub fn num_locks(&self) -> usize {
        self.inner.context.lock().num_locks()
    }

    /// Run `op` with `options` in place of the transaction's own overrides
    pub(crate) fn invoke_with<R, F>(&self, options: &Options, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>,
    {
        self.invoke(|mvcc, ctx| {
            let saved = ctx.options().clone();
            ctx.set_options(options.clone());
            let result = op(mvcc, ctx);
            ctx.set_options(saved);
            result
        })
    }
}

impl TreeOperations for Transaction {
    fn invoke<R, F>(&self, op: F) -> CacheResult<R>
    where
        F: FnOnce(&MvccManager, &mut InvocationContext) -> CacheResult<R>,
    {
        // The status guard is not held while the operation waits on locks
        let mut ctx = self.inner.context.lock();
        let status = self.status();
        if status != TransactionStatus::Active {
            return Err(self.not_active(status));
        }
        op(&self.inner.shared.mvcc, &mut ctx)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("gtx", &self.inner.gtx)
            .field("status", &self.status())
            .finish()
    }
}

/// Starts transactions and binds them to threads
///
/// Cheap to clone; clones share the same bindings and metrics.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<ManagerShared>,
}

impl TransactionManager {
    /// Create a manager running transactions through `mvcc`
    pub fn new(mvcc: Arc<MvccManager>) -> Self {
        TransactionManager {
            shared: Arc::new(ManagerShared {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                mvcc,
                active_count: AtomicU64::new(0),
                total_started: AtomicU64::new(0),
                total_committed: AtomicU64::new(0),
                total_rolled_back: AtomicU64::new(0),
                write_skew_aborts: AtomicU64::new(0),
            }),
        }
    }

    fn bound(&self) -> Option<Transaction> {
        BOUND.with(|bound| bound.borrow().get(&self.shared.id).cloned())
    }

    fn bind(&self, tx: Transaction) {
        BOUND.with(|bound| bound.borrow_mut().insert(self.shared.id, tx));
    }

    fn unbind(&self) -> Option<Transaction> {
        BOUND.with(|bound| bound.borrow_mut().remove(&self.shared.id))
    }

    /// Start a transaction that is not bound to any thread
    pub fn begin_detached(&self) -> Transaction {
        let tx = Transaction::new(Arc::clone(&self.shared));
        self.shared.record_start();
        debug!(target: "treecache::txn", gtx = %tx.gtx(), "Transaction started");
        tx
    }

    /// Start a transaction and bind it to the calling thread
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the thread already has an active transaction.
    pub fn begin(&self) -> CacheResult<Transaction> {
        if let Some(current) = self.current() {
            return Err(CacheError::invalid_operation(format!(
                "thread already bound to {}",
                current.gtx()
            )));
        }
        let tx = self.begin_detached();
        self.bind(tx.clone());
        Ok(tx)
    }

    /// Transaction bound to the calling thread, if any
    ///
    /// Bindings to transactions that were completed through another handle
    /// are dropped here.
    pub fn current(&self) -> Option<Transaction> {
        let tx = self.bound()?;
        if tx.status().is_completed() {
            let _stale = self.unbind();
            return None;
        }
        Some(tx)
    }

    fn require_current(&self) -> CacheResult<Transaction> {
        self.current()
            .ok_or_else(|| CacheError::invalid_operation("no transaction bound to this thread"))
    }

    /// Commit the transaction bound to the calling thread
    ///
    /// The binding is dropped on success. A transaction whose commit was
    /// rejected stays bound until [`rollback`](TransactionManager::rollback).
    pub fn commit(&self) -> CacheResult<()> {
        let tx = self.require_current()?;
        let result = tx.commit();
        if tx.status().is_completed() {
            let _done = self.unbind();
        }
        result
    }

    /// Roll back the transaction bound to the calling thread and unbind it
    pub fn rollback(&self) -> CacheResult<()> {
        let tx = self.require_current()?;
        let _done = self.unbind();
        tx.rollback()
    }

    /// Unbind the calling thread's transaction and hand it out
    pub fn suspend(&self) -> Option<Transaction> {
        let tx = self.current()?;
        let _done = self.unbind();
        debug!(target: "treecache::txn", gtx = %tx.gtx(), "Transaction suspended");
        Some(tx)
    }

    /// Bind a suspended transaction to the calling thread
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the thread already has a transaction, or the
    ///   transaction belongs to another cache
    /// - `TransactionNotActive` if the transaction is not active
    pub fn resume(&self, tx: Transaction) -> CacheResult<()> {
        if !Arc::ptr_eq(&tx.inner.shared, &self.shared) {
            return Err(CacheError::invalid_operation(format!(
                "{} belongs to another cache",
                tx.gtx()
            )));
        }
        let status = tx.status();
        if status != TransactionStatus::Active {
            return Err(tx.not_active(status));
        }
        if let Some(current) = self.current() {
            return Err(CacheError::invalid_operation(format!(
                "thread already bound to {}",
                current.gtx()
            )));
        }
        debug!(target: "treecache::txn", gtx = %tx.gtx(), "Transaction resumed");
        self.bind(tx);
        Ok(())
    }

    /// Get transaction metrics
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.shared.total_started.load(Ordering::Relaxed);
        let committed = self.shared.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.shared.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_rolled_back: self.shared.total_rolled_back.load(Ordering::Relaxed),
            write_skew_aborts: self.shared.write_skew_aborts.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }

    /// Number of transactions neither committed nor rolled back
    pub fn active_count(&self) -> u64 {
        self.shared.active_count.load(Ordering::SeqCst)
    }

    /// Wait for all active transactions to complete
    ///
    /// Returns false if `timeout` expired first.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let sleep_duration = Duration::from_millis(1);

        while self.shared.active_count.load(Ordering::SeqCst) > 0 {
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(sleep_duration);
        }
        true
    }
}

/// Transaction metrics
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Number of currently active transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions rolled back
    pub total_rolled_back: u64,
    /// Commits rejected because of write skew
    pub write_skew_aborts: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + rolled back)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back
    }

    /// Rollback rate (rolled back / started)
    pub fn rollback_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_rolled_back as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
