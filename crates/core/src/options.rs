//! Per-call option overrides
//!
//! Options travel with an invocation context, never through global state.
//! They apply to every operation run under that context until cleared.

use crate::types::DataVersion;
use std::time::Duration;

/// Overrides for the operations of one invocation context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Replaces the configured lock acquisition timeout
    pub lock_acquisition_timeout: Option<Duration>,
    /// Reads acquire the write lock and take a writable copy
    pub force_write_lock: bool,
    /// A lock timeout turns the operation into a no-op instead of an error
    pub fail_silently: bool,
    /// Carried into notifications so replication collaborators can skip the change
    pub cache_mode_local: bool,
    /// Explicit version stamp for every node this context writes
    pub data_version: Option<DataVersion>,
    /// Writes skip lock acquisition entirely
    pub skip_locking: bool,
}

impl Options {
    /// Options with every override unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the lock acquisition timeout
    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout = Some(timeout);
        self
    }

    /// Take write locks on reads
    pub fn with_force_write_lock(mut self, enabled: bool) -> Self {
        self.force_write_lock = enabled;
        self
    }

    /// Swallow lock timeouts
    pub fn with_fail_silently(mut self, enabled: bool) -> Self {
        self.fail_silently = enabled;
        self
    }

    /// Mark changes as local-only
    pub fn with_cache_mode_local(mut self, enabled: bool) -> Self {
        self.cache_mode_local = enabled;
        self
    }

    /// Stamp written nodes with an explicit version
    pub fn with_data_version(mut self, version: DataVersion) -> Self {
        self.data_version = Some(version);
        self
    }

    /// Skip locking on writes
    pub fn with_skip_locking(mut self, enabled: bool) -> Self {
        self.skip_locking = enabled;
        self
    }
}
