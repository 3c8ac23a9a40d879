//! Cache configuration via `treecache.toml`
//!
//! Configuration is read once when a cache starts and is immutable for the
//! engine afterwards. It can be built in code with the `with_*` setters or
//! loaded from a TOML file.
//!
//! # Example
//!
//! ```toml
//! isolation_level = "REPEATABLE_READ"
//! write_skew_check = true
//!
//! [locking]
//! lock_acquisition_timeout_ms = 10000
//! use_lock_striping = false
//! concurrency_level = 500
//! lock_parent_for_child_insert_remove = false
//! ```

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "treecache.toml";

/// Isolation level applied to reads
///
/// `SERIALIZABLE` is accepted as an alias for REPEATABLE_READ and
/// `READ_UNCOMMITTED` for READ_COMMITTED; the MVCC engine offers only these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Reads always see the latest committed node
    #[serde(alias = "READ_UNCOMMITTED")]
    ReadCommitted,
    /// The first read of a node pins it for the rest of the transaction
    #[default]
    #[serde(alias = "SERIALIZABLE")]
    RepeatableRead,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "READ_COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE_READ"),
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READ_COMMITTED" | "READ_UNCOMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE_READ" | "SERIALIZABLE" => Ok(IsolationLevel::RepeatableRead),
            other => Err(CacheError::config(format!(
                "Invalid isolation level '{}'. Expected \"READ_COMMITTED\" or \"REPEATABLE_READ\".",
                other
            ))),
        }
    }
}

/// Lock manager settings, persisted under the `[locking]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingConfig {
    /// How long a write waits for a lock before failing with a timeout
    #[serde(default = "default_lock_acquisition_timeout_ms")]
    pub lock_acquisition_timeout_ms: u64,
    /// Share a fixed pool of locks between Fqns instead of one lock per Fqn
    #[serde(default)]
    pub use_lock_striping: bool,
    /// Number of stripes when striping is enabled
    #[serde(default = "default_concurrency_level")]
    pub concurrency_level: usize,
    /// Lock the parent when inserting or removing one of its direct children
    #[serde(default)]
    pub lock_parent_for_child_insert_remove: bool,
}

fn default_lock_acquisition_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency_level() -> usize {
    500
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_acquisition_timeout_ms: default_lock_acquisition_timeout_ms(),
            use_lock_striping: false,
            concurrency_level: default_concurrency_level(),
            lock_parent_for_child_insert_remove: false,
        }
    }
}

impl LockingConfig {
    /// Lock acquisition timeout as a Duration
    pub fn lock_acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquisition_timeout_ms)
    }
}

/// Cache configuration loaded from `treecache.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Isolation level for reads
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    /// Reject commits whose pinned versions are stale (REPEATABLE_READ only)
    #[serde(default)]
    pub write_skew_check: bool,
    /// Lock manager settings
    #[serde(default)]
    pub locking: LockingConfig,
}

impl CacheConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Enable or disable the commit-time write skew check
    pub fn with_write_skew_check(mut self, enabled: bool) -> Self {
        self.write_skew_check = enabled;
        self
    }

    /// Set the lock acquisition timeout in milliseconds
    pub fn with_lock_acquisition_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.locking.lock_acquisition_timeout_ms = timeout_ms;
        self
    }

    /// Enable lock striping with the given number of stripes
    pub fn with_lock_striping(mut self, concurrency_level: usize) -> Self {
        self.locking.use_lock_striping = true;
        self.locking.concurrency_level = concurrency_level;
        self
    }

    /// Enable or disable parent locking for child insert/remove
    pub fn with_lock_parent_for_child_insert_remove(mut self, enabled: bool) -> Self {
        self.locking.lock_parent_for_child_insert_remove = enabled;
        self
    }

    /// True if the write skew check applies under the configured isolation level
    pub fn write_skew_check_active(&self) -> bool {
        self.write_skew_check && self.isolation_level == IsolationLevel::RepeatableRead
    }

    /// Check the settings for consistency
    ///
    /// # Errors
    ///
    /// Returns an error if striping is enabled with zero stripes.
    pub fn validate(&self) -> CacheResult<()> {
        if self.locking.use_lock_striping && self.locking.concurrency_level == 0 {
            return Err(CacheError::config(
                "concurrency_level must be greater than 0 when use_lock_striping is enabled",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tree cache configuration
#
# Isolation level: "REPEATABLE_READ" (default) or "READ_COMMITTED"
isolation_level = "REPEATABLE_READ"

# Reject commits of nodes whose committed version changed after they were
# first read (REPEATABLE_READ only).
write_skew_check = false

[locking]
# How long a write waits for a lock before failing (milliseconds)
lock_acquisition_timeout_ms = 10000

# Share a fixed pool of `concurrency_level` locks between all nodes
use_lock_striping = false
concurrency_level = 500

# Lock the parent node while one of its children is created or removed
lock_parent_for_child_insert_remove = false
"#
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml_str(content: &str) -> CacheResult<Self> {
        let config: CacheConfig = toml::from_str(content)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> CacheResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            CacheError::Config { message } => {
                CacheError::config(format!("{} ({})", message, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> CacheResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> CacheResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CacheError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
