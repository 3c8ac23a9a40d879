//! Transaction handles across threads
//!
//! - Thread binding, suspend and resume
//! - Locks owned by the transaction, not the thread
//! - Completion bookkeeping

use crate::common::*;
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;
use treecache::{LockOwner, TransactionStatus};

#[test]
fn bound_transaction_commits_atomically() {
    let cache = rr_cache();
    let txm = cache.transaction_manager();

    txm.begin().unwrap();
    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/b"), "k", Value::from(2)).unwrap();
    assert!(cache.peek(&fqn("/a")).is_none());
    txm.commit().unwrap();

    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from(1)));
    assert_eq!(committed(&cache, "/b", "k"), Some(Value::from(2)));
    assert!(txm.current().is_none());
}

#[test]
fn rollback_discards_everything() {
    let cache = rr_cache();
    cache.put(&fqn("/a"), "k", Value::from("kept")).unwrap();
    let txm = cache.transaction_manager();

    txm.begin().unwrap();
    cache.put(&fqn("/a"), "k", Value::from("dropped")).unwrap();
    cache.remove_node(&fqn("/a")).unwrap();
    cache.put(&fqn("/new/x"), "k", Value::from(1)).unwrap();
    txm.rollback().unwrap();

    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from("kept")));
    assert!(!cache.exists(&fqn("/new")).unwrap());
    assert!(no_locks(&cache));
}

#[test]
fn suspended_transaction_finishes_on_another_thread() {
    let cache = rr_cache();
    let txm = cache.transaction_manager();

    let tx = txm.begin().unwrap();
    cache.put(&fqn("/handoff"), "step", Value::from(1)).unwrap();
    let suspended = txm.suspend().unwrap();
    assert!(txm.current().is_none());

    // Unbound thread: plain calls no longer join the transaction
    assert!(!cache.exists(&fqn("/handoff")).unwrap());

    let c = cache.clone();
    thread::spawn(move || {
        let txm = c.transaction_manager();
        txm.resume(suspended).unwrap();
        assert_eq!(c.get(&fqn("/handoff"), "step").unwrap(), Some(Value::from(1)));
        c.put(&fqn("/handoff"), "step", Value::from(2)).unwrap();
        txm.commit().unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(tx.status(), TransactionStatus::Committed);
    assert_eq!(committed(&cache, "/handoff", "step"), Some(Value::from(2)));
    assert!(no_locks(&cache));
}

#[test]
fn transaction_locks_block_its_creating_thread_once_suspended() {
    let cache = rc_cache();
    let txm = cache.transaction_manager();

    let tx = txm.begin().unwrap();
    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();
    let suspended = txm.suspend().unwrap();
    assert!(cache.owns_lock(&fqn("/a"), &LockOwner::Transaction(tx.gtx())));

    // Same thread, but no longer the owner
    let err = cache.put(&fqn("/a"), "k", Value::from(2)).unwrap_err();
    assert!(err.is_timeout());

    txm.resume(suspended).unwrap();
    cache.put(&fqn("/a"), "k", Value::from(3)).unwrap();
    txm.commit().unwrap();
    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from(3)));
}

#[test]
fn handle_shared_between_worker_threads() {
    let cache = rc_cache();
    let tx = cache.transaction_manager().begin_detached();
    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let (done_tx, done_rx) = mpsc::channel();

    for w in 0..workers {
        let tx = tx.clone();
        let barrier = Arc::clone(&barrier);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            barrier.wait();
            for i in 0..10 {
                tx.put(&fqn(&format!("/w{w}/n{i}")), "k", Value::from(i)).unwrap();
            }
            done_tx.send(w).unwrap();
        });
    }
    drop(done_tx);
    assert_eq!(done_rx.iter().count(), workers);

    assert_eq!(cache.number_of_nodes(), 1);
    tx.commit().unwrap();
    assert_eq!(cache.number_of_nodes(), 1 + workers * 11);
    assert!(no_locks(&cache));
}

#[test]
fn begin_twice_on_one_thread_rejected() {
    let cache = rr_cache();
    let txm = cache.transaction_manager();
    txm.begin().unwrap();
    assert!(matches!(txm.begin(), Err(CacheError::InvalidOperation { .. })));
    txm.rollback().unwrap();
    assert!(matches!(txm.commit(), Err(CacheError::InvalidOperation { .. })));
}

#[test]
fn completed_transaction_rejects_work() {
    let cache = rr_cache();
    let tx = cache.transaction_manager().begin_detached();
    tx.commit().unwrap();
    assert!(matches!(
        tx.put(&fqn("/a"), "k", Value::from(1)),
        Err(CacheError::TransactionNotActive { .. })
    ));
    assert!(tx.commit().is_err());
}

#[test]
fn metrics_track_outcomes() {
    let cache = rr_cache();
    let txm = cache.transaction_manager();
    for i in 0..4 {
        let tx = txm.begin_detached();
        tx.put(&fqn("/m"), "k", Value::from(i)).unwrap();
        if i % 2 == 0 {
            tx.commit().unwrap();
        } else {
            tx.rollback().unwrap();
        }
    }
    let open = txm.begin_detached();

    let metrics = txm.metrics();
    assert_eq!(metrics.total_started, 5);
    assert_eq!(metrics.total_committed, 2);
    assert_eq!(metrics.total_rolled_back, 2);
    assert_eq!(metrics.active_count, 1);
    assert!(!txm.wait_for_idle(Duration::from_millis(10)));

    drop(open);
    assert!(txm.wait_for_idle(Duration::from_secs(1)));
}
