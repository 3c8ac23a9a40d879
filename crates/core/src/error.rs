//! Error types for the tree cache
//!
//! Every failure is surfaced to the caller with the Fqn, the owner and the
//! kind, so the caller can decide whether to roll back and retry. The engine
//! never retries on its own.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::fqn::{Fqn, FqnParseError};
use crate::types::{DataVersion, GlobalTransaction, LockOwner};
use std::io;
use thiserror::Error;

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Error types for the tree cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// A lock could not be acquired within the acquisition timeout
    ///
    /// Always recoverable: roll back and optionally retry the transaction.
    #[error("Unable to acquire lock on {fqn} for {owner} after {timeout_ms} ms")]
    Timeout {
        /// Fqn whose lock was requested
        fqn: Fqn,
        /// Owner that requested it
        owner: LockOwner,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// An operation referenced a node that does not exist
    #[error("Node {fqn} does not exist")]
    NodeNotExists {
        /// The missing Fqn
        fqn: Fqn,
    },

    /// An operation used a node reference that has since been invalidated
    ///
    /// The caller must re-resolve the Fqn.
    #[error("Node {fqn} is not valid; it has been removed, moved or evicted")]
    NodeNotValid {
        /// Fqn of the stale node
        fqn: Fqn,
    },

    /// A write carried a data version that does not supersede the committed one
    #[error("Data versioning conflict on {fqn}: {message}")]
    DataVersioning {
        /// Conflicting Fqn
        fqn: Fqn,
        /// Human-readable detail
        message: String,
    },

    /// Commit-time conflict: the committed node changed after this transaction read it
    #[error("Write skew detected on {fqn}: read version {expected:?}, committed version {found:?}")]
    WriteSkew {
        /// Conflicting Fqn
        fqn: Fqn,
        /// Version observed when the transaction first read the node (None = absent)
        expected: Option<DataVersion>,
        /// Version committed now (None = absent)
        found: Option<DataVersion>,
    },

    /// A lock release was attempted by an owner that does not hold the lock
    ///
    /// Indicates a lock-accounting bug; never silently ignored.
    #[error("Illegal release of lock on {fqn} by {owner}: not the current owner")]
    IllegalMonitorState {
        /// Fqn whose lock was released
        fqn: Fqn,
        /// Owner that attempted the release
        owner: LockOwner,
    },

    /// The transaction is not in a state that allows the requested action
    #[error("Transaction {gtx} is not active: {state}")]
    TransactionNotActive {
        /// The transaction
        gtx: GlobalTransaction,
        /// Current state description
        state: String,
    },

    /// Invalid operation or argument
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Human-readable detail
        message: String,
    },

    /// A node name or path could not form an Fqn
    #[error("Invalid fqn: {0}")]
    InvalidFqn(#[from] FqnParseError),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable detail
        message: String,
    },

    /// I/O error while reading or writing configuration
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Create an InvalidOperation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        CacheError::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::Config {
            message: message.into(),
        }
    }

    /// Create a NodeNotExists error
    pub fn node_not_exists(fqn: &Fqn) -> Self {
        CacheError::NodeNotExists { fqn: fqn.clone() }
    }

    /// Create a NodeNotValid error
    pub fn node_not_valid(fqn: &Fqn) -> Self {
        CacheError::NodeNotValid { fqn: fqn.clone() }
    }

    /// Stable classification string
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Timeout { .. } => "timeout",
            CacheError::NodeNotExists { .. } => "node_not_exists",
            CacheError::NodeNotValid { .. } => "node_not_valid",
            CacheError::DataVersioning { .. } => "data_versioning",
            CacheError::WriteSkew { .. } => "write_skew",
            CacheError::IllegalMonitorState { .. } => "illegal_monitor_state",
            CacheError::TransactionNotActive { .. } => "transaction_not_active",
            CacheError::InvalidOperation { .. } => "invalid_operation",
            CacheError::InvalidFqn(_) => "invalid_fqn",
            CacheError::Config { .. } => "config",
            CacheError::Io(_) => "io",
        }
    }

    /// Lock acquisition timed out
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::Timeout { .. })
    }

    /// Commit rejected because of write skew
    pub fn is_write_skew(&self) -> bool {
        matches!(self, CacheError::WriteSkew { .. })
    }

    /// The whole transaction may succeed if rolled back and run again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Timeout { .. }
                | CacheError::WriteSkew { .. }
                | CacheError::DataVersioning { .. }
        )
    }

    /// The Fqn this error is about, if any
    pub fn fqn(&self) -> Option<&Fqn> {
        match self {
            CacheError::Timeout { fqn, .. }
            | CacheError::NodeNotExists { fqn }
            | CacheError::NodeNotValid { fqn }
            | CacheError::DataVersioning { fqn, .. }
            | CacheError::WriteSkew { fqn, .. }
            | CacheError::IllegalMonitorState { fqn, .. } => Some(fqn),
            _ => None,
        }
    }
}
