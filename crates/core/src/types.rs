//! Identity and version types
//!
//! This module defines:
//! - GlobalTransaction: process-wide transaction identity
//! - LockOwner: the party a lock is held by (a thread or a transaction)
//! - DataVersion: version stamp carried by every committed node

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

static NEXT_GLOBAL_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique transaction identity
///
/// A GlobalTransaction is the lock owner for every lock taken by operations
/// performed under that transaction, whichever thread happens to run them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalTransaction(u64);

impl GlobalTransaction {
    /// Allocate a new, never before used, transaction identity
    pub fn next() -> Self {
        Self(NEXT_GLOBAL_TRANSACTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id (for collaborators that carry ids across a boundary)
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTransaction:<{}>", self.0)
    }
}

/// Owner of a lock
///
/// Non-transactional calls lock on behalf of the calling thread; transactional
/// calls lock on behalf of the transaction. Ownership checks compare variants
/// structurally, so a transaction resumed on another thread still owns its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOwner {
    /// A bare thread running a non-transactional call
    Thread(ThreadId),
    /// A transaction, independent of the thread running it
    Transaction(GlobalTransaction),
}

impl LockOwner {
    /// Owner for the calling thread
    pub fn current_thread() -> Self {
        LockOwner::Thread(std::thread::current().id())
    }

    /// The transaction, if this owner is one
    pub fn transaction(&self) -> Option<GlobalTransaction> {
        match self {
            LockOwner::Transaction(gtx) => Some(*gtx),
            LockOwner::Thread(_) => None,
        }
    }

    /// True if this owner is a transaction
    pub fn is_transaction(&self) -> bool {
        matches!(self, LockOwner::Transaction(_))
    }
}

impl From<GlobalTransaction> for LockOwner {
    fn from(gtx: GlobalTransaction) -> Self {
        LockOwner::Transaction(gtx)
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOwner::Thread(id) => write!(f, "{:?}", id),
            LockOwner::Transaction(gtx) => write!(f, "{}", gtx),
        }
    }
}

/// Version stamp of a committed node
///
/// Stamps only ever advance. They are compared to detect write skew and to
/// order tombstone revivals; they carry no wall-clock meaning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct DataVersion(u64);

impl DataVersion {
    /// The version of a node that has never been written
    pub const INITIAL: DataVersion = DataVersion(0);

    /// Create a version from a raw stamp
    pub const fn new(stamp: u64) -> Self {
        Self(stamp)
    }

    /// Raw stamp
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The next stamp after this one
    pub fn increment(&self) -> Self {
        Self(self.0 + 1)
    }

    /// True if `self` is strictly newer than `other`
    pub fn newer_than(&self, other: &DataVersion) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
