//! Storage layer for the tree cache
//!
//! This crate implements the shared, committed node tree:
//! - VersionedNode: one tree cell (data, children, version, validity)
//! - DataContainer: root ownership, lookup, version stamps and the
//!   commit-time structural changes (create, update, tombstone)
//!
//! Transactions never touch these nodes directly while they run; they work
//! on private copies and merge them here at commit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod node;

pub use container::{CommitGuard, DataContainer};
pub use node::{NodeSnapshot, VersionedNode};
