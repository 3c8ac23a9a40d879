//! Lock containers
//!
//! A [`LockContainer`] maps Fqns to [`OwnableReentrantLock`]s. Two strategies:
//!
//! - [`PerElementLockContainer`]: one lock per Fqn, created on demand and
//!   reclaimed once free, so the number of live locks converges to zero
//!   when nothing is held.
//! - [`StripedLockContainer`]: a fixed pool of locks indexed by the Fqn's
//!   hash. Bounded memory; unrelated Fqns that share a stripe contend.
//!
//! # Reclamation
//!
//! A per-element lock is removed from the map when its last hold is released.
//! A thread that fetched the lock object just before removal may acquire the
//! orphaned object; it detects this by re-checking that the map still holds
//! the same object, and retries on the current one.

use crate::lock::OwnableReentrantLock;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use treecache_core::{CacheError, CacheResult, Fqn, LockingConfig, LockOwner};

/// Strategy mapping Fqns to locks
pub trait LockContainer: Send + Sync {
    /// Acquire the lock for `fqn` on behalf of `owner`; false on timeout
    fn acquire(&self, fqn: &Fqn, owner: LockOwner, timeout: Duration) -> bool;

    /// Release one hold of the lock for `fqn`
    ///
    /// # Errors
    ///
    /// `IllegalMonitorState` if `owner` does not hold the lock.
    fn release(&self, fqn: &Fqn, owner: LockOwner) -> CacheResult<()>;

    /// True if the lock covering `fqn` is held by anyone
    fn is_locked(&self, fqn: &Fqn) -> bool;

    /// Owner of the lock covering `fqn`
    fn owner_of(&self, fqn: &Fqn) -> Option<LockOwner>;

    /// True if `owner` holds the lock covering `fqn`
    fn owns_lock(&self, fqn: &Fqn, owner: &LockOwner) -> bool {
        self.owner_of(fqn).as_ref() == Some(owner)
    }

    /// Number of locks currently held
    fn num_locks_held(&self) -> usize;

    /// Number of lock objects currently allocated
    fn size(&self) -> usize;

    /// Human-readable dump of held locks
    fn lock_info(&self) -> String;
}

/// Build the container selected by the locking configuration
pub fn container_for(config: &LockingConfig) -> Arc<dyn LockContainer> {
    if config.use_lock_striping {
        Arc::new(StripedLockContainer::new(config.concurrency_level))
    } else {
        Arc::new(PerElementLockContainer::new())
    }
}

fn illegal_release(fqn: &Fqn, owner: LockOwner) -> CacheError {
    CacheError::IllegalMonitorState {
        fqn: fqn.clone(),
        owner,
    }
}

fn remaining(deadline: Option<Instant>, timeout: Duration) -> Duration {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()),
        None => timeout,
    }
}

// ============================================================================
// Per-element
// ============================================================================

/// One lock per Fqn, reclaimed when free
#[derive(Default)]
pub struct PerElementLockContainer {
    locks: DashMap<Fqn, Arc<OwnableReentrantLock>>,
}

impl PerElementLockContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self, fqn: &Fqn) -> Option<Arc<OwnableReentrantLock>> {
        self.locks.get(fqn).map(|entry| Arc::clone(entry.value()))
    }
}

impl LockContainer for PerElementLockContainer {
    fn acquire(&self, fqn: &Fqn, owner: LockOwner, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let lock = Arc::clone(
                self.locks
                    .entry(fqn.clone())
                    .or_insert_with(|| Arc::new(OwnableReentrantLock::new()))
                    .value(),
            );
            if !lock.try_lock(owner, remaining(deadline, timeout)) {
                return false;
            }
            let still_mapped = self
                .locks
                .get(fqn)
                .is_some_and(|entry| Arc::ptr_eq(entry.value(), &lock));
            if still_mapped {
                return true;
            }
            // Orphaned between lookup and acquisition
            let _ = lock.unlock(owner);
        }
    }

    fn release(&self, fqn: &Fqn, owner: LockOwner) -> CacheResult<()> {
        let lock = self
            .current(fqn)
            .ok_or_else(|| illegal_release(fqn, owner))?;
        let holds = lock.unlock(owner).map_err(|_| illegal_release(fqn, owner))?;
        if holds == 0 {
            self.locks
                .remove_if(fqn, |_, mapped| Arc::ptr_eq(mapped, &lock) && !mapped.is_locked());
        }
        Ok(())
    }

    fn is_locked(&self, fqn: &Fqn) -> bool {
        self.current(fqn).is_some_and(|lock| lock.is_locked())
    }

    fn owner_of(&self, fqn: &Fqn) -> Option<LockOwner> {
        self.current(fqn).and_then(|lock| lock.owner())
    }

    fn num_locks_held(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().is_locked())
            .count()
    }

    fn size(&self) -> usize {
        self.locks.len()
    }

    fn lock_info(&self) -> String {
        let mut held: Vec<(Fqn, LockOwner, usize)> = self
            .locks
            .iter()
            .filter_map(|entry| {
                let lock = entry.value();
                lock.owner()
                    .map(|owner| (entry.key().clone(), owner, lock.hold_count()))
            })
            .collect();
        held.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        for (fqn, owner, holds) in held {
            let _ = writeln!(out, "{} locked by {} (holds: {})", fqn, owner, holds);
        }
        out
    }
}

// ============================================================================
// Striped
// ============================================================================

/// Fixed pool of locks shared by hash
pub struct StripedLockContainer {
    stripes: Vec<OwnableReentrantLock>,
}

impl StripedLockContainer {
    /// Create a pool of `concurrency_level` stripes (at least one)
    pub fn new(concurrency_level: usize) -> Self {
        let stripes = (0..concurrency_level.max(1))
            .map(|_| OwnableReentrantLock::new())
            .collect();
        StripedLockContainer { stripes }
    }

    /// Index of the stripe covering `fqn`
    pub fn stripe_index(&self, fqn: &Fqn) -> usize {
        let mut hasher = FxHasher::default();
        fqn.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    fn stripe(&self, fqn: &Fqn) -> &OwnableReentrantLock {
        &self.stripes[self.stripe_index(fqn)]
    }
}

impl LockContainer for StripedLockContainer {
    fn acquire(&self, fqn: &Fqn, owner: LockOwner, timeout: Duration) -> bool {
        self.stripe(fqn).try_lock(owner, timeout)
    }

    fn release(&self, fqn: &Fqn, owner: LockOwner) -> CacheResult<()> {
        self.stripe(fqn)
            .unlock(owner)
            .map(|_| ())
            .map_err(|_| illegal_release(fqn, owner))
    }

    fn is_locked(&self, fqn: &Fqn) -> bool {
        self.stripe(fqn).is_locked()
    }

    fn owner_of(&self, fqn: &Fqn) -> Option<LockOwner> {
        self.stripe(fqn).owner()
    }

    fn num_locks_held(&self) -> usize {
        self.stripes.iter().filter(|lock| lock.is_locked()).count()
    }

    fn size(&self) -> usize {
        self.stripes.len()
    }

    fn lock_info(&self) -> String {
        let mut out = String::new();
        for (index, lock) in self.stripes.iter().enumerate() {
            if let Some(owner) = lock.owner() {
                let _ = writeln!(
                    out,
                    "stripe {} locked by {} (holds: {})",
                    index,
                    owner,
                    lock.hold_count()
                );
            }
        }
        out
    }
}
