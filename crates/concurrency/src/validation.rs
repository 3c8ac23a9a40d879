//! Commit-time workspace validation
//!
//! Runs before any workspace entry is merged. A commit proceeds only if the
//! result is valid; otherwise nothing is merged and the transaction must be
//! rolled back by its caller.
//!
//! Rules:
//! - Write skew (only when the check is active): every dirty entry's observed
//!   version must equal the currently committed version of its Fqn, where
//!   "absent" on both sides also matches
//! - A created node's parent must exist, either committed or present in the
//!   same workspace
//! - A modified node that was not created by this context must still exist

use crate::context::{InvocationContext, WorkspaceNode};
use treecache_core::{CacheError, DataVersion, Fqn};
use treecache_storage::DataContainer;

/// Types of conflicts that can occur during commit validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// The committed node changed after this context first observed it
    WriteSkew {
        /// The conflicting Fqn
        fqn: Fqn,
        /// Version observed by this context (None = absent)
        read_version: Option<DataVersion>,
        /// Version committed now (None = absent)
        current_version: Option<DataVersion>,
    },

    /// A created node's parent no longer exists
    MissingParent {
        /// The created Fqn
        fqn: Fqn,
        /// Its missing parent
        parent: Fqn,
    },

    /// A modified node no longer exists in the committed tree
    MissingNode {
        /// The modified Fqn
        fqn: Fqn,
    },
}

impl ConflictType {
    /// The error a caller sees for this conflict
    pub fn to_error(&self) -> CacheError {
        match self {
            ConflictType::WriteSkew {
                fqn,
                read_version,
                current_version,
            } => CacheError::WriteSkew {
                fqn: fqn.clone(),
                expected: *read_version,
                found: *current_version,
            },
            ConflictType::MissingParent { parent, .. } => CacheError::node_not_exists(parent),
            ConflictType::MissingNode { fqn } => CacheError::node_not_exists(fqn),
        }
    }
}

/// Result of commit validation
///
/// Accumulates all conflicts found. A commit merges only if `is_valid()`.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// The first conflict as an error, or Ok
    pub fn into_result(self) -> Result<(), CacheError> {
        match self.conflicts.first() {
            Some(conflict) => Err(conflict.to_error()),
            None => Ok(()),
        }
    }
}

/// Compare every dirty entry's observed version with the committed one
pub fn validate_write_skew(ctx: &InvocationContext, container: &DataContainer) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for node in ctx.entries().filter(|n| n.is_dirty()) {
        let current_version = container.peek(node.fqn()).map(|n| n.last_version());
        if current_version != node.read_version() {
            result.conflicts.push(ConflictType::WriteSkew {
                fqn: node.fqn().clone(),
                read_version: node.read_version(),
                current_version,
            });
        }
    }
    result
}

/// Check that every structural change still has somewhere to land
pub fn validate_structure(ctx: &InvocationContext, container: &DataContainer) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for node in ctx.entries().filter(|n| n.is_dirty() && !n.is_removed()) {
        if node.is_created() {
            if let Some(parent) = node.fqn().parent() {
                if !parent_present(ctx, container, &parent) {
                    result.conflicts.push(ConflictType::MissingParent {
                        fqn: node.fqn().clone(),
                        parent,
                    });
                }
            }
        } else if !container.exists(node.fqn()) {
            result
                .conflicts
                .push(ConflictType::MissingNode { fqn: node.fqn().clone() });
        }
    }
    result
}

fn parent_present(ctx: &InvocationContext, container: &DataContainer, parent: &Fqn) -> bool {
    match ctx.lookup(parent) {
        Some(entry) if entry.is_created() => entry.is_present(),
        Some(entry) if !entry.is_present() => false,
        _ => container.exists(parent),
    }
}

/// Validate a complete workspace against the committed tree
///
/// A workspace without dirty entries (read-only) always validates.
pub fn validate_workspace(
    ctx: &InvocationContext,
    container: &DataContainer,
    write_skew_check: bool,
) -> ValidationResult {
    if !ctx.has_changes() {
        return ValidationResult::ok();
    }

    let mut result = ValidationResult::ok();
    if write_skew_check {
        result.merge(validate_write_skew(ctx, container));
    }
    result.merge(validate_structure(ctx, container));
    result
}

/// Dirty entries in merge order
pub fn dirty_entries(ctx: &InvocationContext) -> impl Iterator<Item = &WorkspaceNode> {
    ctx.entries().filter(|n| n.is_dirty())
}
