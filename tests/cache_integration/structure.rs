//! Tree structure changes
//!
//! Subtree removal and tombstones, moves, explicit data versions and node
//! handles that outlive their node.

use crate::common::*;
use std::collections::BTreeSet;
use std::thread;

fn names(cache: &TreeCache, path: &str) -> BTreeSet<String> {
    cache.get_children_names(&fqn(path)).unwrap().unwrap_or_default()
}

// ============================================================================
// Removal and tombstones
// ============================================================================

#[test]
fn remove_takes_whole_subtree() {
    let cache = rc_cache();
    cache.put(&fqn("/a/b/c"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/a/d"), "k", Value::from(2)).unwrap();
    assert_eq!(cache.number_of_nodes(), 5);

    assert!(cache.remove_node(&fqn("/a")).unwrap());
    assert!(!cache.exists(&fqn("/a/b/c")).unwrap());
    assert!(names(&cache, "/").is_empty());
    assert_eq!(cache.number_of_nodes(), 1);
    assert!(!cache.remove_node(&fqn("/a")).unwrap());
}

#[test]
fn tombstone_invisible_until_recreated() {
    let cache = rc_cache();
    cache.put(&fqn("/a"), "old", Value::from(1)).unwrap();
    let stale = cache.peek(&fqn("/a")).unwrap();
    cache.remove_node(&fqn("/a")).unwrap();

    assert!(cache.peek(&fqn("/a")).is_none());
    assert_eq!(cache.get_data(&fqn("/a")).unwrap(), None);

    cache.put(&fqn("/a"), "new", Value::from(2)).unwrap();
    let data = cache.get_data(&fqn("/a")).unwrap().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data.get("new"), Some(&Value::from(2)));
    assert!(!stale.is_valid());
}

#[test]
fn purge_drops_tombstones_only() {
    let cache = rc_cache();
    cache.put(&fqn("/keep"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/gone/x"), "k", Value::from(1)).unwrap();
    cache.remove_node(&fqn("/gone")).unwrap();

    assert!(cache.purge_tombstones() >= 1);
    assert_eq!(cache.purge_tombstones(), 0);
    assert!(cache.exists(&fqn("/keep")).unwrap());
    assert!(cache.print_tree().starts_with('/'));
}

#[test]
fn remove_then_recreate_in_one_transaction() {
    let cache = rc_cache();
    cache.put(&fqn("/a/child"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/a"), "k", Value::from("old")).unwrap();

    let tx = cache.transaction_manager().begin_detached();
    tx.remove_node(&fqn("/a")).unwrap();
    tx.put(&fqn("/a"), "k", Value::from("new")).unwrap();
    assert!(tx.get_children_names(&fqn("/a")).unwrap().unwrap().is_empty());
    tx.commit().unwrap();

    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from("new")));
    assert!(!cache.exists(&fqn("/a/child")).unwrap());
}

#[test]
fn remove_root_empties_tree() {
    let cache = rc_cache();
    cache.put(&fqn("/x/y"), "k", Value::from(1)).unwrap();
    cache.put(&Fqn::root(), "rk", Value::from(1)).unwrap();

    assert!(cache.remove_node(&Fqn::root()).unwrap());
    assert_eq!(cache.number_of_nodes(), 1);
    assert!(cache.root().is_valid());
    assert!(cache.root().data().unwrap().is_empty());
}

#[test]
fn child_of_concurrently_removed_parent_fails_commit() {
    let cache = rc_cache();
    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();

    let creator = cache.transaction_manager().begin_detached();
    creator.put(&fqn("/a/b"), "k", Value::from(1)).unwrap();

    let c = cache.clone();
    thread::spawn(move || assert!(c.remove_node(&fqn("/a")).unwrap()))
        .join()
        .unwrap();

    let err = creator.commit().unwrap_err();
    assert!(matches!(err, CacheError::NodeNotExists { .. }));
    creator.rollback().unwrap();
    assert!(no_locks(&cache));
    assert!(!cache.exists(&fqn("/a")).unwrap());
}

#[test]
fn wide_commit_racing_parent_removal_is_all_or_nothing() {
    let cache = cache_with(
        CacheConfig::new()
            .with_isolation_level(IsolationLevel::ReadCommitted)
            .with_lock_acquisition_timeout_ms(5_000),
    );
    assert!(!cache.config().locking.lock_parent_for_child_insert_remove);

    for round in 0..20 {
        let parent = format!("/p{round}");
        cache.put(&fqn(&parent), "k", Value::from(1)).unwrap();

        let creator = cache.transaction_manager().begin_detached();
        let wide: Vec<Fqn> = (0..300).map(|i| fqn(&format!("/r{round}n{i:03}"))).collect();
        for f in &wide {
            creator.put(f, "k", Value::from(1)).unwrap();
        }
        creator.put(&fqn(&format!("{parent}/child")), "k", Value::from(1)).unwrap();

        let remover = {
            let cache = cache.clone();
            let parent = fqn(&parent);
            thread::spawn(move || assert!(cache.remove_node(&parent).unwrap()))
        };
        let result = creator.commit();
        remover.join().unwrap();

        let merged = wide.iter().filter(|f| cache.peek(f).is_some()).count();
        match result {
            Ok(()) => assert_eq!(merged, wide.len()),
            Err(err) => {
                assert!(matches!(err, CacheError::NodeNotExists { .. }));
                assert_eq!(merged, 0, "round {round}: failed commit merged {merged} nodes");
                creator.rollback().unwrap();
            }
        }
        assert!(!cache.exists(&fqn(&parent)).unwrap());
        assert!(no_locks(&cache));
    }
}

// ============================================================================
// Moves
// ============================================================================

#[test]
fn deep_move_relocates_subtree() {
    let cache = rc_cache();
    cache.put(&fqn("/src/a/b"), "k", Value::from("b")).unwrap();
    cache.put(&fqn("/src"), "k", Value::from("src")).unwrap();
    cache.put(&fqn("/dst"), "k", Value::from("dst")).unwrap();

    let moved = cache.move_node(&fqn("/src"), &fqn("/dst"), true).unwrap();
    assert_eq!(moved, Some(fqn("/dst/src")));

    assert!(!cache.exists(&fqn("/src")).unwrap());
    assert_eq!(committed(&cache, "/dst/src", "k"), Some(Value::from("src")));
    assert_eq!(committed(&cache, "/dst/src/a/b", "k"), Some(Value::from("b")));
    assert_eq!(names(&cache, "/"), BTreeSet::from(["dst".to_string()]));
    assert!(no_locks(&cache));
}

#[test]
fn shallow_move_relocates_subtree() {
    let cache = rc_cache();
    cache.put(&fqn("/src/a"), "k", Value::from("a")).unwrap();
    cache.put(&fqn("/dst"), "k", Value::from("dst")).unwrap();

    let tx = cache.transaction_manager().begin_detached();
    tx.move_node(&fqn("/src"), &fqn("/dst"), false).unwrap();
    assert!(!cache.is_locked(&fqn("/src/a")));
    tx.commit().unwrap();

    assert_eq!(committed(&cache, "/dst/src/a", "k"), Some(Value::from("a")));
    assert!(!cache.exists(&fqn("/src/a")).unwrap());
}

#[test]
fn move_replaces_existing_target() {
    let cache = rc_cache();
    cache.put(&fqn("/src"), "k", Value::from("new")).unwrap();
    cache.put(&fqn("/dst/src/stale"), "k", Value::from("old")).unwrap();

    cache.move_node(&fqn("/src"), &fqn("/dst"), true).unwrap();
    assert_eq!(committed(&cache, "/dst/src", "k"), Some(Value::from("new")));
    assert!(!cache.exists(&fqn("/dst/src/stale")).unwrap());
}

#[test]
fn invalid_moves_rejected() {
    let cache = rc_cache();
    cache.put(&fqn("/a/b"), "k", Value::from(1)).unwrap();

    let err = cache.move_node(&fqn("/a"), &fqn("/a/b"), true).unwrap_err();
    assert!(matches!(err, CacheError::InvalidOperation { .. }));
    let err = cache.move_node(&Fqn::root(), &fqn("/a"), true).unwrap_err();
    assert!(matches!(err, CacheError::InvalidOperation { .. }));
    let err = cache.move_node(&fqn("/missing"), &fqn("/a"), true).unwrap_err();
    assert!(matches!(err, CacheError::NodeNotExists { .. }));

    // Moving onto its current parent is a no-op
    assert_eq!(
        cache.move_node(&fqn("/a/b"), &fqn("/a"), true).unwrap(),
        Some(fqn("/a/b"))
    );
    assert!(no_locks(&cache));
}

#[test]
fn uncommitted_move_invisible_to_others() {
    let cache = rc_cache();
    cache.put(&fqn("/src/a"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/dst"), "k", Value::from(1)).unwrap();

    let tx = cache.transaction_manager().begin_detached();
    tx.move_node(&fqn("/src"), &fqn("/dst"), true).unwrap();
    assert!(tx.exists(&fqn("/dst/src/a")).unwrap());
    assert!(!tx.exists(&fqn("/src")).unwrap());

    assert!(cache.exists(&fqn("/src/a")).unwrap());
    assert!(!cache.exists(&fqn("/dst/src")).unwrap());
    tx.rollback().unwrap();
    assert!(cache.exists(&fqn("/src/a")).unwrap());
}

// ============================================================================
// Explicit data versions
// ============================================================================

#[test]
fn explicit_version_must_beat_tombstone() {
    let cache = rc_cache();
    let versioned = |v: u64| cache.with_options(Options::new().with_data_version(DataVersion::new(v)));

    versioned(5).put(&fqn("/a"), "k", Value::from("v5")).unwrap();
    assert_eq!(cache.peek(&fqn("/a")).unwrap().version().unwrap(), DataVersion::new(5));
    versioned(7).remove_node(&fqn("/a")).unwrap();

    let err = versioned(6).put(&fqn("/a"), "k", Value::from("v6")).unwrap_err();
    assert!(matches!(err, CacheError::DataVersioning { .. }));
    assert!(!cache.exists(&fqn("/a")).unwrap());
    assert!(no_locks(&cache));

    versioned(8).put(&fqn("/a"), "k", Value::from("v8")).unwrap();
    assert_eq!(committed(&cache, "/a", "k"), Some(Value::from("v8")));
    assert_eq!(cache.peek(&fqn("/a")).unwrap().version().unwrap(), DataVersion::new(8));
}

#[test]
fn explicit_version_must_beat_removal_of_enclosing_subtree() {
    let cache = rc_cache();
    let versioned = |v: u64| cache.with_options(Options::new().with_data_version(DataVersion::new(v)));

    versioned(10).put(&fqn("/a/b"), "k", Value::from("v10")).unwrap();
    versioned(20).remove_node(&fqn("/a")).unwrap();
    versioned(21).put(&fqn("/a"), "k", Value::from("v21")).unwrap();

    let err = versioned(5).put(&fqn("/a/b"), "k", Value::from("v5")).unwrap_err();
    assert!(matches!(err, CacheError::DataVersioning { .. }));
    assert!(!cache.exists(&fqn("/a/b")).unwrap());
    assert!(no_locks(&cache));

    versioned(22).put(&fqn("/a/b"), "k", Value::from("v22")).unwrap();
    assert_eq!(committed(&cache, "/a/b", "k"), Some(Value::from("v22")));
}

#[test]
fn allocated_versions_increase_per_commit() {
    let cache = rc_cache();
    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();
    let first = cache.peek(&fqn("/a")).unwrap().version().unwrap();

    let tx = cache.transaction_manager().begin_detached();
    tx.put(&fqn("/a"), "k", Value::from(2)).unwrap();
    tx.put(&fqn("/b"), "k", Value::from(2)).unwrap();
    tx.commit().unwrap();

    let a = cache.peek(&fqn("/a")).unwrap().version().unwrap();
    let b = cache.peek(&fqn("/b")).unwrap().version().unwrap();
    assert!(a.newer_than(&first));
    assert_eq!(a, b);
}

// ============================================================================
// Node handles
// ============================================================================

#[test]
fn node_handle_navigates_and_writes() {
    let cache = rc_cache();
    let root = cache.root();
    let users = root.add_child("users").unwrap();
    cache.put(&users.child("alice"), "age", Value::from(41)).unwrap();

    let users = cache.peek(&users).unwrap();
    let alice = users.child("alice").unwrap().unwrap();
    assert_eq!(alice.get("age").unwrap(), Some(Value::from(41)));
    alice.put("age", Value::from(42)).unwrap();
    assert_eq!(committed(&cache, "/users/alice", "age"), Some(Value::from(42)));

    assert!(users.remove_child("alice").unwrap());
    assert!(!alice.is_valid());
    assert!(matches!(alice.data(), Err(CacheError::NodeNotValid { .. })));
}
