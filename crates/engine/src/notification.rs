//! Change notifications
//!
//! The commit step reports every structural and data change to registered
//! [`CacheListener`]s. Events are emitted after the workspace is merged and
//! before the committing context releases its locks, so a listener observes
//! changes in commit order per Fqn.
//!
//! Listeners run on the committing thread. They must not start transactions
//! against the same cache.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;
use treecache_core::{Fqn, GlobalTransaction, NodeData};

/// A node was created, modified or removed
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    /// Node name
    pub fqn: Fqn,
    /// Data before the change (None for a creation)
    pub before: Option<NodeData>,
    /// Data after the change (None for a removal)
    pub after: Option<NodeData>,
    /// Originating transaction, None for a non-transactional call
    pub gtx: Option<GlobalTransaction>,
    /// The change must not be propagated to peers
    pub cache_mode_local: bool,
}

/// A subtree was moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEvent {
    /// Old Fqn of the subtree root
    pub from: Fqn,
    /// New Fqn of the subtree root
    pub to: Fqn,
    /// Originating transaction, None for a non-transactional call
    pub gtx: Option<GlobalTransaction>,
    /// The change must not be propagated to peers
    pub cache_mode_local: bool,
}

/// One committed change
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Node created
    Created(NodeEvent),
    /// Node data modified
    Modified(NodeEvent),
    /// Node (and its subtree) removed
    Removed(NodeEvent),
    /// Subtree moved
    Moved(MoveEvent),
}

/// Receiver of committed changes
///
/// All methods default to no-ops.
pub trait CacheListener: Send + Sync {
    /// A node was created
    fn node_created(&self, _event: &NodeEvent) {}
    /// A node's data changed
    fn node_modified(&self, _event: &NodeEvent) {}
    /// A node and its subtree were removed
    fn node_removed(&self, _event: &NodeEvent) {}
    /// A subtree was moved
    fn node_moved(&self, _event: &MoveEvent) {}
    /// A transaction committed (`true`) or rolled back (`false`)
    fn transaction_completed(&self, _gtx: GlobalTransaction, _committed: bool) {}
}

/// Registry of listeners
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<Arc<dyn CacheListener>>>,
}

impl Notifier {
    /// Create a notifier with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn CacheListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener; false if it was not registered
    pub fn remove_listener(&self, listener: &Arc<dyn CacheListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// True if at least one listener is registered
    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    /// Deliver committed changes, in order
    pub fn emit(&self, events: &[CacheEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for event in events {
            trace!(target: "treecache::notify", event = ?event, "Notifying");
            for listener in &listeners {
                match event {
                    CacheEvent::Created(e) => listener.node_created(e),
                    CacheEvent::Modified(e) => listener.node_modified(e),
                    CacheEvent::Removed(e) => listener.node_removed(e),
                    CacheEvent::Moved(e) => listener.node_moved(e),
                }
            }
        }
    }

    /// Report the end of a transaction
    pub fn transaction_completed(&self, gtx: GlobalTransaction, committed: bool) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.transaction_completed(gtx, committed);
        }
    }
}
