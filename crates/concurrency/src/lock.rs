//! Reentrant, ownership-aware lock
//!
//! The lock is held by a [`LockOwner`]: a bare thread for non-transactional
//! calls, or a `GlobalTransaction` for transactional ones. Ownership is a
//! value comparison, not a thread comparison, so a transaction that is
//! suspended on one thread and resumed on another still owns (and may
//! re-enter and release) every lock it took.
//!
//! # Invariants
//!
//! - Only the current owner may increment or decrement the hold count
//! - A release by anyone else fails and leaves the lock untouched
//! - The lock is free exactly when the hold count is zero

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};
use treecache_core::LockOwner;

/// Returned when a release is attempted by a party that does not own the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotOwner {
    /// Who held the lock at the time of the failed release
    pub current: Option<LockOwner>,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<LockOwner>,
    holds: usize,
}

/// Reentrant mutual exclusion lock with an explicit owner
#[derive(Default)]
pub struct OwnableReentrantLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl OwnableReentrantLock {
    /// Create a free lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `owner`, waiting at most `timeout`
    ///
    /// Re-entering a lock already held by `owner` succeeds immediately and
    /// increments the hold count. Returns false if the timeout expired.
    pub fn try_lock(&self, owner: LockOwner, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(owner);
                    state.holds = 1;
                    return true;
                }
                Some(current) if current == owner => {
                    state.holds += 1;
                    return true;
                }
                Some(_) => match deadline {
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return false;
                        }
                        self.released.wait_until(&mut state, deadline);
                    }
                    None => self.released.wait(&mut state),
                },
            }
        }
    }

    /// Decrement the hold count on behalf of `owner`
    ///
    /// Returns the remaining hold count; the lock is free when it is zero.
    ///
    /// # Errors
    ///
    /// `NotOwner` if `owner` does not currently hold the lock.
    pub fn unlock(&self, owner: LockOwner) -> Result<usize, NotOwner> {
        let mut state = self.state.lock();
        match state.owner {
            Some(current) if current == owner && state.holds > 0 => {
                state.holds -= 1;
                if state.holds == 0 {
                    state.owner = None;
                    drop(state);
                    self.released.notify_one();
                    return Ok(0);
                }
                Ok(state.holds)
            }
            current => Err(NotOwner { current }),
        }
    }

    /// True if any owner holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Current owner, if any
    pub fn owner(&self) -> Option<LockOwner> {
        self.state.lock().owner
    }

    /// True if `owner` currently holds the lock
    pub fn is_held_by(&self, owner: &LockOwner) -> bool {
        self.state.lock().owner.as_ref() == Some(owner)
    }

    /// Number of times the current owner has entered the lock
    pub fn hold_count(&self) -> usize {
        self.state.lock().holds
    }
}

impl fmt::Debug for OwnableReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OwnableReentrantLock")
            .field("owner", &state.owner)
            .field("holds", &state.holds)
            .finish()
    }
}
