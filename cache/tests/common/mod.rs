#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use fibre_stash::debounce::Debouncer;
use fibre_stash::{CacheBuilder, CacheListener, ManualClock};

/// Installs a test-friendly tracing subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// Cache names must be unique per process: the debouncer and the pressure
/// registry are shared.
pub fn unique_name(prefix: &str) -> String {
  static COUNTER: AtomicUsize = AtomicUsize::new(0);
  format!("{prefix}_{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub fn manual_clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()))
}

/// A builder that saves into `dir` and runs its debounced work on a private
/// debouncer, so tests do not observe each other's timers.
pub fn persistent_builder(name: &str, dir: &Path) -> CacheBuilder<String, i32> {
  CacheBuilder::new(name)
    .storage_dir(dir)
    .debouncer(Arc::new(Debouncer::new()))
}

pub fn wait_for_debounce(threshold: Duration) {
  std::thread::sleep(threshold * 4 + Duration::from_millis(100));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
  Updated(String, i32),
  Cleared,
  Removed(Vec<String>),
}

/// Records every callback it receives, in order.
#[derive(Default)]
pub struct RecordingListener {
  events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn events(&self) -> Vec<Recorded> {
    self.events.lock().unwrap().clone()
  }

  pub fn clear(&self) {
    self.events.lock().unwrap().clear();
  }
}

impl CacheListener<String, i32> for RecordingListener {
  fn on_item_updated(&self, _cache_name: &str, key: &String, value: &Arc<i32>) {
    self
      .events
      .lock()
      .unwrap()
      .push(Recorded::Updated(key.clone(), **value));
  }

  fn on_cleared(&self, _cache_name: &str) {
    self.events.lock().unwrap().push(Recorded::Cleared);
  }

  fn on_items_removed(&self, _cache_name: &str, keys: &[String]) {
    self
      .events
      .lock()
      .unwrap()
      .push(Recorded::Removed(keys.to_vec()));
  }
}

pub fn key(i: usize) -> String {
  format!("k{i}")
}
