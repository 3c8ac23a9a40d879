//! Isolation level behaviour
//!
//! - READ_COMMITTED reads follow the latest commit
//! - REPEATABLE_READ pins the first read, including "node absent"
//! - Write skew is rejected only when the check is enabled

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

// ============================================================================
// READ_COMMITTED
// ============================================================================

#[test]
fn read_committed_sees_every_commit() {
    let cache = rc_cache();
    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();

    let reader = cache.transaction_manager().begin_detached();
    assert_eq!(reader.get(&fqn("/a"), "k").unwrap(), Some(Value::from(1)));

    cache.put(&fqn("/a"), "k", Value::from(2)).unwrap();
    assert_eq!(reader.get(&fqn("/a"), "k").unwrap(), Some(Value::from(2)));

    cache.remove_node(&fqn("/a")).unwrap();
    assert!(!reader.exists(&fqn("/a")).unwrap());
    reader.commit().unwrap();
}

#[test]
fn uncommitted_writes_stay_private() {
    let cache = rc_cache();
    let writer = cache.transaction_manager().begin_detached();
    writer.put(&fqn("/a/b"), "k", Value::from("draft")).unwrap();

    // Readers never block on the writer's locks
    let c = cache.clone();
    let seen = thread::spawn(move || (c.exists(&fqn("/a")).unwrap(), c.get(&fqn("/a/b"), "k").unwrap()))
        .join()
        .unwrap();
    assert_eq!(seen, (false, None));

    writer.commit().unwrap();
    assert_eq!(committed(&cache, "/a/b", "k"), Some(Value::from("draft")));
}

// ============================================================================
// REPEATABLE_READ
// ============================================================================

#[test]
fn repeatable_read_keeps_first_snapshot() {
    let cache = rr_cache();
    cache.put(&fqn("/a"), "k", Value::from("v1")).unwrap();

    let reader = cache.transaction_manager().begin_detached();
    assert_eq!(reader.get(&fqn("/a"), "k").unwrap(), Some(Value::from("v1")));

    let c = cache.clone();
    thread::spawn(move || c.put(&fqn("/a"), "k", Value::from("v2")).unwrap())
        .join()
        .unwrap();

    assert_eq!(reader.get(&fqn("/a"), "k").unwrap(), Some(Value::from("v1")));
    reader.commit().unwrap();
    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from("v2")));
}

#[test]
fn repeatable_read_pins_absence() {
    let cache = rr_cache();
    let reader = cache.transaction_manager().begin_detached();
    assert!(!reader.exists(&fqn("/late")).unwrap());

    cache.put(&fqn("/late"), "k", Value::from("v")).unwrap();

    assert!(!reader.exists(&fqn("/late")).unwrap());
    assert_eq!(reader.get_data(&fqn("/late")).unwrap(), None);
    reader.rollback().unwrap();

    assert!(cache.exists(&fqn("/late")).unwrap());
}

#[test]
fn repeatable_read_many_readers_one_writer() {
    let cache = rr_cache();
    cache.put(&fqn("/counter"), "n", Value::from(0)).unwrap();

    let readers = 4;
    let barrier = Arc::new(Barrier::new(readers + 1));

    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txm = cache.transaction_manager();
                txm.begin().unwrap();
                let first = cache.get(&fqn("/counter"), "n").unwrap();
                barrier.wait();
                for _ in 0..50 {
                    assert_eq!(cache.get(&fqn("/counter"), "n").unwrap(), first);
                    thread::yield_now();
                }
                txm.commit().unwrap();
            })
        })
        .collect();

    barrier.wait();
    for i in 1..=50 {
        cache.put(&fqn("/counter"), "n", Value::from(i)).unwrap();
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(committed(&cache, "/counter", "n"), Some(Value::from(50)));
}

// ============================================================================
// Write skew
// ============================================================================

fn race_read_then_write(cache: &TreeCache) -> (treecache::Transaction, treecache::Transaction) {
    cache.put(&fqn("/acct"), "balance", Value::from(100)).unwrap();
    let txm = cache.transaction_manager();
    let t1 = txm.begin_detached();
    let t2 = txm.begin_detached();
    t1.get(&fqn("/acct"), "balance").unwrap();
    t2.get(&fqn("/acct"), "balance").unwrap();

    t1.put(&fqn("/acct"), "balance", Value::from(90)).unwrap();
    t1.commit().unwrap();
    t2.put(&fqn("/acct"), "balance", Value::from(80)).unwrap();
    (t1, t2)
}

#[test]
fn write_skew_rejected_when_checked() {
    let cache = cache_with(
        CacheConfig::new()
            .with_write_skew_check(true)
            .with_lock_acquisition_timeout_ms(100),
    );
    let (_t1, t2) = race_read_then_write(&cache);

    let err = t2.commit().unwrap_err();
    assert!(err.is_write_skew());
    assert_eq!(t2.status(), treecache::TransactionStatus::MarkedRollback);
    assert_eq!(committed(&cache, "/acct", "balance"), Some(Value::from(90)));

    t2.rollback().unwrap();
    assert!(no_locks(&cache));
    assert_eq!(cache.transaction_manager().metrics().write_skew_aborts, 1);
}

#[test]
fn write_skew_allowed_when_unchecked() {
    let cache = rr_cache();
    let (_t1, t2) = race_read_then_write(&cache);
    t2.commit().unwrap();
    assert_eq!(committed(&cache, "/acct", "balance"), Some(Value::from(80)));
}

#[test]
fn write_skew_check_ignored_under_read_committed() {
    let cache = cache_with(
        CacheConfig::new()
            .with_isolation_level(IsolationLevel::ReadCommitted)
            .with_write_skew_check(true)
            .with_lock_acquisition_timeout_ms(100),
    );
    let (_t1, t2) = race_read_then_write(&cache);
    t2.commit().unwrap();
    assert_eq!(committed(&cache, "/acct", "balance"), Some(Value::from(80)));
}
