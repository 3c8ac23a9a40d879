//! Cache integration tests
//!
//! End-to-end behaviour of the public cache surface under concurrent use:
//! isolation levels, write locking, tree structure changes, transaction
//! handles and change notifications.
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test cache_integration
//! ```

mod common;

mod isolation;
mod locking;
mod notifications;
mod structure;
mod transactions;
