//! Treecache - transactional, tree-structured in-process data cache
//!
//! Data lives in a tree of nodes named by [`Fqn`]s such as `/a/b/c`. Each
//! node holds a small key/value map. Writers take exclusive locks per node;
//! readers never block and see either the latest committed state
//! (READ_COMMITTED) or the state pinned by their first read
//! (REPEATABLE_READ).
//!
//! # Quick Start
//!
//! ```ignore
//! use treecache::{CacheConfig, Fqn, TreeCache, TreeOperations, Value};
//!
//! let cache = TreeCache::new(CacheConfig::new())?;
//! let fqn: Fqn = "/users/alice".parse()?;
//!
//! // Outside a transaction every call commits immediately
//! cache.put(&fqn, "email", Value::from("alice@example.com"))?;
//!
//! // Inside one, changes become visible at commit
//! let txm = cache.transaction_manager();
//! txm.begin()?;
//! cache.put(&fqn, "age", Value::from(41))?;
//! cache.move_node(&fqn, &"/archive".parse()?, true)?;
//! txm.commit()?;
//! ```
//!
//! # Architecture
//!
//! - `treecache-core`: names, values, errors, configuration, options
//! - `treecache-storage`: the committed node tree
//! - `treecache-concurrency`: locks, invocation contexts, commit validation
//! - `treecache-engine`: MVCC reads and writes, transactions, the cache facade

pub use treecache_concurrency::{
    AtomicLockMetrics, InvocationContext, LockManager, LockMetrics, LockMetricsSnapshot,
    NoopLockMetrics,
};
pub use treecache_core::{
    CacheConfig, CacheError, CacheResult, DataVersion, Fqn, FqnParseError, GlobalTransaction,
    IsolationLevel, LockOwner, LockingConfig, NodeData, Options, Value,
};
pub use treecache_engine::{
    CacheEvent, CacheListener, MoveEvent, Node, NodeEvent, Transaction, TransactionManager,
    TransactionMetrics, TransactionStatus, TreeCache, TreeOperations, WithOptions,
};
