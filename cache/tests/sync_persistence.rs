mod common;

use common::{init_tracing, key, manual_clock, persistent_builder, unique_name};
use fibre_stash::{Clock, PersistError};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_sync_save_and_load_round_trip() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("round trip");

  let cache = persistent_builder(&name, dir.path()).max_size(5).build_persistent();
  for i in 0..3 {
    cache.set(key(i), i as i32 * 10);
  }
  assert!(cache.save());
  assert!(!cache.is_dirty());
  assert!(cache.last_save_time().is_some());
  drop(cache);

  let restored = persistent_builder(&name, dir.path())
    .max_size(99)
    .attempt_load(true)
    .build_persistent();
  assert_eq!(restored.max_size(), 5);
  assert_eq!(restored.len(), 3);
  assert_eq!(restored.keys_by_insertion(), vec![key(0), key(1), key(2)]);
  assert_eq!(restored.get(&key(2)), Some(Arc::new(20)));
  assert!(!restored.is_dirty());
  assert_eq!(restored.metrics().loads, 1);
}

#[test]
fn test_sync_state_file_layout() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("layout");
  let clock = manual_clock();

  let cache = persistent_builder(&name, dir.path())
    .max_size(4)
    .flush_to_size(2)
    .tracks_ages(true)
    .clock(clock.clone())
    .build_persistent();
  cache.set("a".to_string(), 1);
  assert!(cache.save());

  let path = cache.state_path().unwrap();
  assert_eq!(path, dir.path().join(format!("{}.json", name)));
  let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
  assert_eq!(json["name"], name.as_str());
  assert_eq!(json["maxSize"], 4);
  assert_eq!(json["flushToSize"], 2);
  assert_eq!(json["latestKeys"], serde_json::json!(["a"]));
  assert_eq!(json["items"]["a"]["value"], 1);
  assert_eq!(json["items"]["a"]["date"], "2024-01-01T12:00:00Z");
  assert_eq!(json["isSavesDates"], true);
  assert_eq!(json["isLog"], false);
  assert_eq!(json["isFlushItemsOlderThan"], 30.0 * 24.0 * 3600.0);
  assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_sync_memory_only_save_writes_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("memory_only"), dir.path())
    .memory_only(true)
    .build_persistent();
  cache.set(key(0), 0);

  assert!(cache.save());
  assert!(!cache.is_dirty());
  assert!(cache.last_save_time().is_some());
  assert!(!cache.state_path().unwrap().exists());
  assert!(matches!(cache.try_save(), Ok(false)));
}

#[test]
fn test_sync_load_without_file_is_not_an_error() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("nothing"), dir.path()).build_persistent();
  assert!(matches!(cache.try_load(), Ok(false)));
  assert!(!cache.load());
  assert_eq!(cache.metrics().load_failures, 0);
}

#[test]
fn test_sync_corrupt_file_leaves_cache_empty() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("corrupt");
  let seed = persistent_builder(&name, dir.path()).build_persistent();
  fs::write(seed.state_path().unwrap(), b"{ not json").unwrap();
  drop(seed);

  let cache = persistent_builder(&name, dir.path()).attempt_load(true).build_persistent();
  assert!(cache.is_empty());
  assert_eq!(cache.metrics().load_failures, 1);
  assert!(matches!(cache.try_load(), Err(PersistError::Json { .. })));
}

#[test]
fn test_sync_load_rejects_other_cache_name() {
  let dir = tempfile::tempdir().unwrap();
  let suffix = unique_name("shared");
  // Both names map to the same file stem.
  let writer = persistent_builder(&format!("stem {suffix}"), dir.path()).build_persistent();
  writer.set(key(0), 0);
  assert!(writer.save());

  let reader = persistent_builder(&format!("stem_{suffix}"), dir.path()).build_persistent();
  assert_eq!(reader.state_path().unwrap(), writer.state_path().unwrap());
  match reader.try_load() {
    Err(PersistError::NameMismatch { expected, found }) => {
      assert_eq!(expected, format!("stem_{suffix}"));
      assert_eq!(found, format!("stem {suffix}"));
    }
    other => panic!("expected a name mismatch, got {other:?}"),
  }
  assert!(!reader.load());
  assert!(reader.is_empty());
}

#[test]
fn test_sync_load_applies_saved_settings_and_evicts() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("hand_written");
  let cache = persistent_builder(&name, dir.path()).build_persistent();
  let record = serde_json::json!({
    "saveTimeout": 0.3,
    "maxSize": 2,
    "flushToSize": null,
    "items": {
      "x": { "value": 1 },
      "y": { "value": 2 },
      "z": { "value": 3 }
    },
    "latestKeys": ["x", "y", "z"],
    "name": name,
    "isLog": true,
    "oldestItemsDates": [],
    "isSavesDates": false,
    "isFlushItemsOlderThan": 60.0
  });
  fs::write(cache.state_path().unwrap(), serde_json::to_vec(&record).unwrap()).unwrap();

  assert!(cache.load());
  assert_eq!(cache.max_size(), 2);
  assert_eq!(cache.keys_by_insertion(), vec!["y".to_string(), "z".to_string()]);
  assert!(cache.log_enabled());
  assert!(!cache.tracks_ages());
  assert_eq!(cache.max_age(), Some(Duration::from_secs(60)));
  // The eviction changed the loaded state.
  assert!(cache.is_dirty());
}

#[test]
fn test_sync_failed_save_keeps_dirty_flag() {
  let dir = tempfile::tempdir().unwrap();
  let blocker = dir.path().join("blocker");
  fs::write(&blocker, b"a file, not a directory").unwrap();

  let cache = persistent_builder(&unique_name("blocked"), &blocker.join("nested")).build_persistent();
  cache.set(key(0), 0);

  assert!(!cache.save());
  assert!(cache.is_dirty());
  assert!(cache.last_save_time().is_none());
  assert_eq!(cache.metrics().save_failures, 1);
  assert!(matches!(cache.try_save(), Err(PersistError::Io { .. })));
}

#[test]
fn test_sync_save_if_needed_rate_limits() {
  let dir = tempfile::tempdir().unwrap();
  let clock = manual_clock();
  let cache = persistent_builder(&unique_name("if_needed"), dir.path())
    .clock(clock.clone())
    .build_persistent();

  assert!(!cache.save_if_needed(), "a clean cache needs no save");

  cache.set(key(0), 0);
  assert!(cache.save_if_needed(), "never saved before");

  cache.set(key(1), 1);
  assert!(!cache.save_if_needed(), "saved less than a second ago");

  clock.advance(Duration::from_secs(2));
  assert!(cache.save_if_needed());
  assert_eq!(cache.metrics().saves, 2);
}

#[test]
fn test_sync_keys_file_round_trip() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("keys only");
  let cache = persistent_builder(&name, dir.path()).build_persistent();
  assert_eq!(cache.load_keys(), None);

  for i in 0..3 {
    cache.set(key(i), i as i32);
  }
  assert!(cache.save_keys());

  let path = cache.keys_path().unwrap();
  assert_eq!(
    path.file_name().unwrap().to_string_lossy(),
    format!("keys_for_{}.json", name.replace(' ', "_"))
  );
  assert_eq!(cache.load_keys(), Some(vec![key(0), key(1), key(2)]));
}

#[test]
fn test_sync_in_memory_build_cannot_load() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("plain");
  let writer = persistent_builder(&name, dir.path()).build_persistent();
  writer.set(key(0), 0);
  assert!(writer.save());
  drop(writer);

  // `build` ignores attempt_load.
  let cache = persistent_builder(&name, dir.path()).attempt_load(true).build();
  assert!(cache.is_empty());
}

#[test]
fn test_sync_memory_only_load_reads_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let name = unique_name("memory_only_load");
  let writer = persistent_builder(&name, dir.path()).build_persistent();
  writer.set(key(0), 0);
  assert!(writer.save());
  drop(writer);

  let cache = persistent_builder(&name, dir.path())
    .memory_only(true)
    .build_persistent();
  cache.set(key(1), 1);
  assert!(cache.load());
  assert_eq!(cache.keys_by_insertion(), vec![key(1)]);
  assert!(!cache.is_dirty());
  assert_eq!(cache.metrics().loads, 0);

  let fresh = persistent_builder(&unique_name("memory_only_fresh"), dir.path())
    .memory_only(true)
    .build_persistent();
  assert!(matches!(fresh.try_load(), Ok(true)));
}

#[test]
fn test_sync_memory_only_save_keys_counts_as_saved() {
  let dir = tempfile::tempdir().unwrap();
  let cache = persistent_builder(&unique_name("memory_only_keys"), dir.path())
    .memory_only(true)
    .build_persistent();
  cache.set(key(0), 0);

  assert!(cache.save_keys());
  assert!(!cache.is_dirty());
  assert!(cache.last_save_time().is_some());
  assert!(!cache.keys_path().unwrap().exists());
  assert_eq!(cache.load_keys(), None);
}

#[test]
fn test_sync_keys_only_cache_save_keys_if_needed_rate_limits() {
  let dir = tempfile::tempdir().unwrap();
  let clock = manual_clock();
  let cache = fibre_stash::CacheBuilder::<String, i32>::new(unique_name("keys_if_needed"))
    .storage_dir(dir.path())
    .clock(clock.clone())
    .build_keys_persistent();

  cache.set(key(0), 0);
  assert!(cache.save_keys_if_needed());
  assert!(!cache.save_keys_if_needed(), "nothing changed since");
  assert!(!cache.is_dirty());
  assert_eq!(cache.last_save_time(), Some(clock.now()));

  cache.set(key(1), 1);
  assert!(!cache.save_keys_if_needed(), "keys saved less than a second ago");

  clock.advance(Duration::from_secs(2));
  assert!(cache.save_keys_if_needed());
  assert_eq!(cache.load_keys(), Some(vec![key(0), key(1)]));
}

#[test]
fn test_sync_full_cache_save_keys_if_needed_rate_limits() {
  let dir = tempfile::tempdir().unwrap();
  let clock = manual_clock();
  let cache = persistent_builder(&unique_name("full_keys_if_needed"), dir.path())
    .clock(clock.clone())
    .build_persistent();

  cache.set(key(0), 0);
  assert!(cache.save_keys_if_needed());
  assert!(!cache.save_keys_if_needed());
  // The full state is still unsaved.
  assert!(cache.is_dirty());
  assert_eq!(cache.last_save_time(), None);
}
