//! Core types for the tree cache
//!
//! This crate defines the foundational types used throughout the system:
//! - Fqn: Hierarchical name of a tree node
//! - Value / NodeData: Node data entries
//! - GlobalTransaction, LockOwner, DataVersion: Identity and versioning
//! - CacheError: Error type hierarchy
//! - CacheConfig: Configuration (isolation level, locking)
//! - Options: Per-call overrides

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod fqn;
pub mod options;
pub mod types;
pub mod value;

pub use config::{CacheConfig, IsolationLevel, LockingConfig, CONFIG_FILE_NAME};
pub use error::{CacheError, CacheResult};
pub use fqn::{Fqn, FqnParseError};
pub use options::Options;
pub use types::{DataVersion, GlobalTransaction, LockOwner};
pub use value::{NodeData, Value};
