//! Concurrency layer for the tree cache
//!
//! This crate implements pessimistic write locking with MVCC workspaces:
//! - OwnableReentrantLock: reentrant lock owned by a thread or a transaction
//! - LockContainer: per-element or striped mapping of Fqns to locks
//! - LockManager: acquisition policy, timeouts, parent locking, release
//! - InvocationContext: locked set, workspace copies and option overrides
//! - Validation: commit-time write skew and structure checks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod context;
pub mod lock;
pub mod lock_manager;
pub mod metrics;
pub mod validation;

pub use container::{
    container_for, LockContainer, PerElementLockContainer, StripedLockContainer,
};
pub use context::{InvocationContext, SharedContext, WorkspaceNode};
pub use lock::{NotOwner, OwnableReentrantLock};
pub use lock_manager::LockManager;
pub use metrics::{AtomicLockMetrics, LockMetrics, LockMetricsSnapshot, NoopLockMetrics};
pub use validation::{validate_workspace, ConflictType, ValidationResult};
