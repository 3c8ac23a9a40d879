//! Shared helpers for the cache integration suite

#![allow(dead_code)]

use std::sync::Once;

pub use treecache::{
    CacheConfig, CacheError, DataVersion, Fqn, IsolationLevel, NodeData, Options, TreeCache,
    TreeOperations, Value,
};

static INIT_TRACING: Once = Once::new();

/// Route cache logs to the test writer; set RUST_LOG to see them
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fqn(s: &str) -> Fqn {
    s.parse().unwrap()
}

pub fn cache_with(config: CacheConfig) -> TreeCache {
    init_tracing();
    TreeCache::new(config).unwrap()
}

/// READ_COMMITTED cache with a short lock timeout
pub fn rc_cache() -> TreeCache {
    cache_with(
        CacheConfig::new()
            .with_isolation_level(IsolationLevel::ReadCommitted)
            .with_lock_acquisition_timeout_ms(100),
    )
}

/// REPEATABLE_READ cache with a short lock timeout
pub fn rr_cache() -> TreeCache {
    cache_with(CacheConfig::new().with_lock_acquisition_timeout_ms(100))
}

/// Committed value of `key` at `path`, read outside any transaction
pub fn committed(cache: &TreeCache, path: &str, key: &str) -> Option<Value> {
    cache.peek(&fqn(path))?.get(key).ok().flatten()
}

/// True when no lock is held anywhere in the cache
pub fn no_locks(cache: &TreeCache) -> bool {
    cache.num_locks_held() == 0
}
