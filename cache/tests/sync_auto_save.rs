mod common;

use common::{key, persistent_builder, unique_name, wait_for_debounce};
use fibre_stash::debounce::Debouncer;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(100);

#[test]
fn test_sync_burst_of_sets_saves_once() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("burst"), dir.path())
    .max_size(100)
    .auto_save(TIMEOUT)
    .build_persistent();

  for i in 0..50 {
    cache.set(key(i), i as i32);
  }
  assert_eq!(cache.metrics().saves, 0, "no save before the timeout");

  wait_for_debounce(TIMEOUT);
  assert_eq!(cache.metrics().saves, 1);
  assert!(!cache.is_dirty());
  assert!(cache.state_path().unwrap().exists());
}

#[test]
fn test_sync_later_mutation_saves_again() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("again"), dir.path())
    .auto_save(TIMEOUT)
    .build_persistent();

  cache.set(key(0), 0);
  wait_for_debounce(TIMEOUT);
  cache.remove(&key(0));
  wait_for_debounce(TIMEOUT);

  assert_eq!(cache.metrics().saves, 2);
}

#[test]
fn test_sync_timeout_floor_applies() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("floor"), dir.path())
    .auto_save(Duration::from_millis(1))
    .build_persistent();
  assert_eq!(cache.auto_save_timeout(), Some(Duration::from_millis(30)));

  cache.set_auto_save_timeout(None);
  cache.set(key(0), 0);
  thread::sleep(Duration::from_millis(200));
  assert_eq!(cache.metrics().saves, 0);
}

#[test]
fn test_sync_dropping_cache_cancels_pending_save() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("dropped"), dir.path())
    .auto_save(TIMEOUT)
    .build_persistent();
  let path = cache.state_path().unwrap();

  cache.set(key(0), 0);
  drop(cache);
  wait_for_debounce(TIMEOUT);
  assert!(!path.exists());
}

#[test]
fn test_sync_memory_only_auto_save_clears_dirty() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("memory_auto"), dir.path())
    .memory_only(true)
    .auto_save(TIMEOUT)
    .build_persistent();

  cache.set(key(0), 0);
  assert!(cache.is_dirty());
  wait_for_debounce(TIMEOUT);
  assert!(!cache.is_dirty());
  assert!(!cache.state_path().unwrap().exists());
}

#[test]
fn test_sync_dropping_predecessor_keeps_successor_save() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("successor");
  let debouncer = Arc::new(Debouncer::new());
  let build = || {
    persistent_builder(&name, dir.path())
      .debouncer(Arc::clone(&debouncer))
      .auto_save(TIMEOUT)
      .build_persistent()
  };

  let first = build();
  first.set(key(0), 0);
  let second = build();
  second.set(key(1), 1);
  drop(first);

  wait_for_debounce(TIMEOUT);
  assert_eq!(second.metrics().saves, 1);
  assert!(!second.is_dirty());
}
