mod common;

use common::{key, manual_clock, unique_name};
use fibre_stash::debounce::Debouncer;
use fibre_stash::{AgeRefresh, CacheBuilder, Clock};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_sync_clear_older_than_with_manual_clock() {
  let clock = manual_clock();
  let cache = CacheBuilder::<String, i32>::new(unique_name("age"))
    .tracks_ages(true)
    .no_max_age()
    .clock(clock.clone())
    .build();

  cache.set(key(0), 0);
  cache.set(key(1), 1);
  clock.advance(Duration::from_secs(10));
  cache.set(key(2), 2);

  assert_eq!(cache.clear_older_than(Duration::from_secs(5)), 2);
  assert_eq!(cache.keys(), vec![key(2)]);
  assert_eq!(cache.metrics().expired_by_age, 2);
  assert_eq!(cache.clear_older_than(Duration::from_secs(5)), 0);
  assert_eq!(cache.metrics().expired_by_age, 2);
}

#[test]
fn test_sync_clear_before_keeps_equal_timestamps() {
  let clock = manual_clock();
  let cache = CacheBuilder::<String, i32>::new(unique_name("age_edge"))
    .tracks_ages(true)
    .clock(clock.clone())
    .build();

  cache.set(key(0), 0);
  let cutoff = clock.now();
  assert_eq!(cache.inserted_at(&key(0)), Some(cutoff));

  assert_eq!(cache.clear_before(cutoff), 0);
  assert!(cache.contains_key(&key(0)));
}

#[test]
fn test_sync_clear_by_age_without_tracking_is_a_no_op() {
  let cache = CacheBuilder::<String, i32>::new(unique_name("no_ages")).build();
  cache.set(key(0), 0);
  assert!(cache.inserted_at(&key(0)).is_none());
  assert_eq!(cache.clear_older_than(Duration::ZERO), 0);
  assert_eq!(cache.len(), 1);
}

#[test]
fn test_sync_untimed_entries_count_as_expired() {
  let clock = manual_clock();
  let cache = CacheBuilder::<String, i32>::new(unique_name("untimed"))
    .no_max_age()
    .clock(clock.clone())
    .build();

  cache.set(key(0), 0);
  cache.set_tracks_ages(true);
  cache.set(key(1), 1);

  assert_eq!(cache.clear_older_than(Duration::from_secs(60)), 1);
  assert_eq!(cache.keys(), vec![key(1)]);
}

#[test]
fn test_sync_age_refresh_policies() {
  for (policy, expected_removed) in [(AgeRefresh::KeepFirst, 1), (AgeRefresh::OnWrite, 0)] {
    let clock = manual_clock();
    let cache = CacheBuilder::<String, i32>::new(unique_name("refresh"))
      .tracks_ages(true)
      .no_max_age()
      .age_refresh(policy)
      .clock(clock.clone())
      .build();

    cache.set(key(0), 0);
    clock.advance(Duration::from_secs(10));
    cache.set(key(0), 1);

    assert_eq!(
      cache.clear_older_than(Duration::from_secs(5)),
      expected_removed,
      "policy {policy:?}"
    );
  }
}

#[test]
fn test_sync_sweep_expired_uses_max_age() {
  let clock = manual_clock();
  let cache = CacheBuilder::<String, i32>::new(unique_name("sweep_now"))
    .tracks_ages(true)
    .max_age(Duration::from_secs(3600))
    .clock(clock.clone())
    .build();

  cache.set(key(0), 0);
  clock.advance(Duration::from_secs(7200));
  cache.set(key(1), 1);

  assert_eq!(cache.sweep_expired(), 1);
  assert_eq!(cache.keys(), vec![key(1)]);
}

#[test]
fn test_sync_debounced_sweep_runs_after_insert() {
  let clock = manual_clock();
  let debouncer = Arc::new(Debouncer::new());
  let cache = CacheBuilder::<String, i32>::new(unique_name("sweep_later"))
    .tracks_ages(true)
    .max_age(Duration::from_secs(3600))
    .clock(clock.clone())
    .debouncer(debouncer.clone())
    .build();

  cache.set(key(0), 0);
  clock.advance(Duration::from_secs(7200));
  cache.set(key(1), 1);
  // Nothing is swept synchronously.
  assert_eq!(cache.len(), 2);

  thread::sleep(Duration::from_millis(700));
  assert_eq!(cache.keys(), vec![key(1)]);
  assert_eq!(cache.metrics().expired_by_age, 1);
}

#[test]
fn test_sync_disabling_max_age_stops_expiration() {
  let clock = manual_clock();
  let cache = CacheBuilder::<String, i32>::new(unique_name("no_max_age"))
    .tracks_ages(true)
    .max_age(Duration::from_secs(1))
    .clock(clock.clone())
    .build();

  cache.set(key(0), 0);
  cache.set_max_age(None);
  clock.advance(Duration::from_secs(60));
  assert_eq!(cache.sweep_expired(), 0);
  assert_eq!(cache.len(), 1);
}
