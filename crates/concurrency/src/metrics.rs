//! Lock metrics sink
//!
//! The lock manager reports every acquisition, release, timeout and illegal
//! release to a [`LockMetrics`] implementation. The default sink discards
//! everything; [`AtomicLockMetrics`] keeps relaxed counters for diagnostics
//! and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use treecache_core::{Fqn, LockOwner};

/// Receiver of lock events
pub trait LockMetrics: Send + Sync {
    /// A lock was granted
    fn lock_acquired(&self, _fqn: &Fqn, _owner: &LockOwner) {}
    /// A lock was released
    fn lock_released(&self, _fqn: &Fqn, _owner: &LockOwner) {}
    /// A lock request timed out
    fn lock_timed_out(&self, _fqn: &Fqn, _owner: &LockOwner) {}
    /// A release was attempted by a non-owner
    fn illegal_release(&self, _fqn: &Fqn, _owner: &LockOwner) {}
}

/// Sink that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockMetrics;

impl LockMetrics for NoopLockMetrics {}

/// Counting sink
#[derive(Debug, Default)]
pub struct AtomicLockMetrics {
    acquired: AtomicU64,
    released: AtomicU64,
    timed_out: AtomicU64,
    illegal: AtomicU64,
}

/// Point-in-time copy of [`AtomicLockMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockMetricsSnapshot {
    /// Locks granted
    pub acquired: u64,
    /// Locks released
    pub released: u64,
    /// Requests that timed out
    pub timed_out: u64,
    /// Releases by a non-owner
    pub illegal_releases: u64,
}

impl LockMetricsSnapshot {
    /// Locks granted but not yet released
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

impl AtomicLockMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            illegal_releases: self.illegal.load(Ordering::Relaxed),
        }
    }
}

impl LockMetrics for AtomicLockMetrics {
    fn lock_acquired(&self, _fqn: &Fqn, _owner: &LockOwner) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_released(&self, _fqn: &Fqn, _owner: &LockOwner) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_timed_out(&self, _fqn: &Fqn, _owner: &LockOwner) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    fn illegal_release(&self, _fqn: &Fqn, _owner: &LockOwner) {
        self.illegal.fetch_add(1, Ordering::Relaxed);
    }
}
