//! Write locking under contention
//!
//! - One writer per node; the loser times out or waits
//! - Every code path releases what it took, striped or not
//! - Optional parent locking serializes sibling inserts

use crate::common::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ============================================================================
// Mutual exclusion
// ============================================================================

#[test]
fn second_writer_times_out() {
    let cache = rc_cache();
    let holder = cache.transaction_manager().begin_detached();
    holder.put(&fqn("/a"), "k", Value::from("holder")).unwrap();

    let c = cache.clone();
    let err = thread::spawn(move || c.put(&fqn("/a"), "k", Value::from("other")).unwrap_err())
        .join()
        .unwrap();
    assert!(err.is_timeout());
    assert!(matches!(err, CacheError::Timeout { timeout_ms: 100, .. }));

    holder.commit().unwrap();
    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from("holder")));
    assert!(no_locks(&cache));
}

#[test]
fn waiting_writer_proceeds_after_commit() {
    let cache = cache_with(CacheConfig::new().with_lock_acquisition_timeout_ms(5_000));
    let holder = cache.transaction_manager().begin_detached();
    holder.put(&fqn("/a"), "k", Value::from(1)).unwrap();

    let c = cache.clone();
    let waiter = thread::spawn(move || c.put(&fqn("/a"), "k", Value::from(2)).unwrap());

    thread::sleep(Duration::from_millis(30));
    holder.commit().unwrap();
    assert_eq!(waiter.join().unwrap(), Some(Value::from(1)));
    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from(2)));
}

#[test]
fn serialized_increments_are_not_lost() {
    let cache = cache_with(CacheConfig::new().with_lock_acquisition_timeout_ms(10_000));
    cache.put(&fqn("/counter"), "n", Value::from(0)).unwrap();

    let threads = 8;
    let rounds = 50;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txm = cache.transaction_manager();
                barrier.wait();
                for _ in 0..rounds {
                    txm.begin().unwrap();
                    // Lock before reading so the read cannot go stale
                    let n = cache
                        .with_options(Options::new().with_force_write_lock(true))
                        .get(&fqn("/counter"), "n")
                        .unwrap()
                        .and_then(|v| v.as_int())
                        .unwrap();
                    cache.put(&fqn("/counter"), "n", Value::from(n + 1)).unwrap();
                    txm.commit().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        committed(&cache, "/counter", "n"),
        Some(Value::from((threads * rounds) as i64))
    );
    assert!(no_locks(&cache));
}

// ============================================================================
// No lock leakage
// ============================================================================

fn random_workload(cache: TreeCache) {
    let threads = 10;
    let ops = 1_000;
    let timeouts = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = cache.clone();
            let timeouts = Arc::clone(&timeouts);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                for i in 0..ops {
                    let path = format!("/n{}/c{}", rng.gen_range(0..5), rng.gen_range(0..5));
                    let target = fqn(&path);
                    let result = match rng.gen_range(0..6) {
                        0 => cache.remove_node(&target).map(|_| ()),
                        1 => cache.remove_key(&target, "k").map(|_| ()),
                        2 => cache.get(&target, "k").map(|_| ()),
                        3 => cache
                            .move_node(&target, &fqn(&format!("/n{}", rng.gen_range(0..5))), i % 2 == 0)
                            .map(|_| ()),
                        _ => cache.put(&target, "k", Value::from(i)).map(|_| ()),
                    };
                    match result {
                        Ok(()) => {}
                        Err(err) if err.is_timeout() => {
                            timeouts.fetch_add(1, Ordering::Relaxed);
                        }
                        // Moves race with removals of their endpoints
                        Err(CacheError::NodeNotExists { .. }) => {}
                        Err(CacheError::InvalidOperation { .. }) => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.num_locks_held(), 0, "{}", cache.print_lock_info());
    assert!(cache.transaction_manager().wait_for_idle(Duration::from_secs(1)));
}

#[test]
fn no_locks_leak_per_element() {
    let cache = cache_with(CacheConfig::new().with_lock_acquisition_timeout_ms(200));
    random_workload(cache.clone());
    assert_eq!(cache.lock_container_size(), 0);
}

#[test]
fn no_locks_leak_striped() {
    let cache = cache_with(
        CacheConfig::new()
            .with_lock_striping(8)
            .with_lock_acquisition_timeout_ms(200),
    );
    random_workload(cache.clone());
    assert_eq!(cache.lock_container_size(), 8);
}

#[test]
fn fail_silently_never_leaks() {
    let cache = rc_cache();
    let holder = cache.transaction_manager().begin_detached();
    holder.put(&fqn("/a/b"), "k", Value::from(1)).unwrap();

    let c = cache.clone();
    thread::spawn(move || {
        let quiet = c.with_options(
            Options::new()
                .with_fail_silently(true)
                .with_lock_acquisition_timeout(Duration::from_millis(10)),
        );
        assert_eq!(quiet.put(&fqn("/a/b"), "k", Value::from(2)).unwrap(), None);
        assert!(!quiet.remove_node(&fqn("/a")).unwrap());
    })
    .join()
    .unwrap();

    holder.rollback().unwrap();
    assert!(no_locks(&cache));
    assert!(cache.peek(&fqn("/a")).is_none());
}

// ============================================================================
// Parent locking and striping
// ============================================================================

#[test]
fn parent_lock_serializes_sibling_inserts() {
    let cache = cache_with(
        CacheConfig::new()
            .with_lock_parent_for_child_insert_remove(true)
            .with_lock_acquisition_timeout_ms(50),
    );
    cache.put(&fqn("/p"), "k", Value::from(0)).unwrap();

    let first = cache.transaction_manager().begin_detached();
    first.put(&fqn("/p/x"), "k", Value::from(1)).unwrap();
    assert!(cache.owns_lock(&fqn("/p"), &treecache::LockOwner::Transaction(first.gtx())));

    let c = cache.clone();
    let err = thread::spawn(move || c.put(&fqn("/p/y"), "k", Value::from(2)).unwrap_err())
        .join()
        .unwrap();
    assert!(err.is_timeout());

    first.commit().unwrap();
    cache.put(&fqn("/p/y"), "k", Value::from(2)).unwrap();
    assert_eq!(cache.get_children_names(&fqn("/p")).unwrap().unwrap().len(), 2);
}

#[test]
fn sibling_inserts_concurrent_without_parent_lock() {
    let cache = rc_cache();
    cache.put(&fqn("/p"), "k", Value::from(0)).unwrap();

    let first = cache.transaction_manager().begin_detached();
    first.put(&fqn("/p/x"), "k", Value::from(1)).unwrap();
    assert!(!cache.is_locked(&fqn("/p")));

    let c = cache.clone();
    thread::spawn(move || c.put(&fqn("/p/y"), "k", Value::from(2)).unwrap())
        .join()
        .unwrap();
    first.commit().unwrap();
    assert_eq!(cache.get_children_names(&fqn("/p")).unwrap().unwrap().len(), 2);
}

#[test]
fn striping_bounds_lock_objects() {
    let cache = cache_with(CacheConfig::new().with_lock_striping(4));
    let txm = cache.transaction_manager();
    let tx = txm.begin_detached();
    for i in 0..64 {
        tx.put(&fqn(&format!("/s/n{i}")), "k", Value::from(i)).unwrap();
    }
    assert_eq!(cache.lock_container_size(), 4);
    assert!(cache.num_locks_held() <= 4);
    tx.commit().unwrap();
    assert!(no_locks(&cache));
    assert_eq!(cache.number_of_nodes(), 66);
}
