//! Change notifications from committed work

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use treecache::{CacheListener, GlobalTransaction, MoveEvent, NodeEvent};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    completions: Mutex<Vec<(GlobalTransaction, bool)>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl CacheListener for Recorder {
    fn node_created(&self, event: &NodeEvent) {
        self.events.lock().push(format!("created {}", event.fqn));
    }

    fn node_modified(&self, event: &NodeEvent) {
        self.events.lock().push(format!("modified {}", event.fqn));
    }

    fn node_removed(&self, event: &NodeEvent) {
        self.events.lock().push(format!("removed {}", event.fqn));
    }

    fn node_moved(&self, event: &MoveEvent) {
        self.events.lock().push(format!("moved {} -> {}", event.from, event.to));
    }

    fn transaction_completed(&self, gtx: GlobalTransaction, committed: bool) {
        self.completions.lock().push((gtx, committed));
    }
}

fn recorded_cache() -> (TreeCache, Arc<Recorder>) {
    let cache = rc_cache();
    let recorder = Arc::new(Recorder::default());
    cache.add_listener(recorder.clone());
    (cache, recorder)
}

#[test]
fn events_follow_commit_order() {
    let (cache, recorder) = recorded_cache();
    cache.put(&fqn("/a/b"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/a/b"), "k", Value::from(2)).unwrap();
    cache.remove_node(&fqn("/a")).unwrap();

    assert_eq!(
        recorder.take(),
        vec!["created /a", "created /a/b", "modified /a/b", "removed /a"]
    );
    // Non-transactional calls have no transaction to complete
    assert!(recorder.completions.lock().is_empty());
}

#[test]
fn nothing_emitted_before_commit_or_after_rollback() {
    let (cache, recorder) = recorded_cache();
    let txm = cache.transaction_manager();

    let tx = txm.begin().unwrap();
    cache.put(&fqn("/x"), "k", Value::from(1)).unwrap();
    assert!(recorder.take().is_empty());
    txm.rollback().unwrap();
    assert!(recorder.take().is_empty());

    let committed_tx = txm.begin().unwrap();
    cache.put(&fqn("/y"), "k", Value::from(1)).unwrap();
    txm.commit().unwrap();
    assert_eq!(recorder.take(), vec!["created /y"]);

    assert_eq!(
        *recorder.completions.lock(),
        vec![(tx.gtx(), false), (committed_tx.gtx(), true)]
    );
}

#[test]
fn move_reports_relocation() {
    let (cache, recorder) = recorded_cache();
    cache.put(&fqn("/src"), "k", Value::from(1)).unwrap();
    cache.put(&fqn("/dst"), "k", Value::from(1)).unwrap();
    recorder.take();

    cache.move_node(&fqn("/src"), &fqn("/dst"), true).unwrap();
    let events = recorder.take();
    assert!(events.contains(&"created /dst/src".to_string()));
    assert!(events.contains(&"removed /src".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("moved /src -> /dst/src"));
}

#[test]
fn local_mode_flag_carried_on_events() {
    let cache = rc_cache();

    #[derive(Default)]
    struct LocalFlags(Mutex<Vec<bool>>);
    impl CacheListener for LocalFlags {
        fn node_created(&self, event: &NodeEvent) {
            self.0.lock().push(event.cache_mode_local);
        }
    }

    let flags = Arc::new(LocalFlags::default());
    cache.add_listener(flags.clone());
    cache.put(&fqn("/shared"), "k", Value::from(1)).unwrap();
    cache
        .with_options(Options::new().with_cache_mode_local(true))
        .put(&fqn("/local"), "k", Value::from(1))
        .unwrap();

    assert_eq!(*flags.0.lock(), vec![false, true]);
}

#[test]
fn removed_listener_stops_receiving() {
    let (cache, kept) = recorded_cache();
    let dropped = Arc::new(Recorder::default());
    let as_listener: Arc<dyn CacheListener> = dropped.clone();
    cache.add_listener(as_listener.clone());
    assert!(cache.remove_listener(&as_listener));
    assert!(!cache.remove_listener(&as_listener));

    cache.put(&fqn("/a"), "k", Value::from(1)).unwrap();
    assert_eq!(kept.take(), vec!["created /a"]);
    assert!(dropped.take().is_empty());
}
