//! Transactional tree cache engine
//!
//! This crate orchestrates the lower layers:
//! - MvccManager: locking, workspace copies, commit and rollback of every
//!   tree operation
//! - TransactionManager / Transaction: lifecycle, thread binding,
//!   suspend/resume, metrics
//! - Notifier / CacheListener: committed change notifications
//! - TreeCache / Node: the public facade and committed node handles
//!
//! The engine is the only component that knows about:
//! - Isolation levels
//! - Option overrides
//! - Merge order and notification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod mvcc;
pub mod node;
pub mod notification;
pub mod ops;
pub mod transaction;

pub use cache::{TreeCache, WithOptions};
pub use mvcc::MvccManager;
pub use node::Node;
pub use notification::{CacheEvent, CacheListener, MoveEvent, NodeEvent, Notifier};
pub use ops::TreeOperations;
pub use transaction::{Transaction, TransactionManager, TransactionMetrics, TransactionStatus};
