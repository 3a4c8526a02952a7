//! JSON persistence of a cache: the full-state file and the keys-only file.
//!
//! Both files live in the cache's storage directory. Their names derive from
//! the cache name, see [`file_stem`].
//!
//! The state file is an object with camelCase fields (`name`, `maxSize`,
//! `flushToSize`, `items`, `latestKeys`, ...). Dates, both `items.*.date` and
//! `oldestItemsDates`, are RFC 3339 strings such as `"2024-01-01T12:00:00Z"`,
//! not numeric timestamps. Files with numeric dates fail to load with
//! [`PersistError::Json`].

use crate::entry::CacheEntry;
use crate::error::{PersistError, Result};
use crate::handles::Cache;
use crate::metrics::Metrics;
use crate::shared::{CacheShared, PersistHooks};
use crate::CacheBuilder;

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Saves closer together than this are skipped by `save_if_needed`.
const MIN_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// One persisted entry, as read back from disk.
#[derive(Debug, Deserialize)]
struct StoredEntry<V> {
  value: V,
  #[serde(default)]
  date: Option<DateTime<Utc>>,
}

/// One persisted entry, borrowed from the live cache for writing.
#[derive(Serialize)]
struct StoredEntryRef<'a, V> {
  value: &'a V,
  #[serde(skip_serializing_if = "Option::is_none")]
  date: Option<DateTime<Utc>>,
}

/// The full-state file as written.
#[derive(Serialize)]
#[serde(rename_all = "camelCase", bound(serialize = "K: Serialize, V: Serialize"))]
struct CacheRecordRef<'a, K, V> {
  save_timeout: f64,
  max_size: usize,
  flush_to_size: Option<usize>,
  items: HashMap<&'a K, StoredEntryRef<'a, V>>,
  latest_keys: Vec<K>,
  name: &'a str,
  is_log: bool,
  oldest_items_dates: Vec<DateTime<Utc>>,
  is_saves_dates: bool,
  is_flush_items_older_than: Option<f64>,
}

/// The full-state file as read. Missing fields fall back to defaults.
#[derive(Deserialize)]
#[serde(
  rename_all = "camelCase",
  bound(deserialize = "K: Eq + Hash + Deserialize<'de>, V: Deserialize<'de>")
)]
struct CacheRecord<K, V> {
  #[serde(default)]
  #[allow(dead_code)]
  save_timeout: f64,
  #[serde(default = "default_max_size")]
  max_size: usize,
  #[serde(default)]
  flush_to_size: Option<usize>,
  #[serde(default)]
  items: HashMap<K, StoredEntry<V>>,
  #[serde(default)]
  latest_keys: Vec<K>,
  name: String,
  #[serde(default)]
  is_log: bool,
  #[serde(default)]
  oldest_items_dates: Vec<DateTime<Utc>>,
  #[serde(default)]
  is_saves_dates: bool,
  #[serde(default)]
  is_flush_items_older_than: Option<f64>,
}

fn default_max_size() -> usize {
  crate::builder::DEFAULT_MAX_SIZE
}

/// Turns a cache name into a file stem: whitespace and ASCII punctuation
/// become `_`.
pub fn file_stem(name: &str) -> String {
  name
    .chars()
    .map(|c| {
      if c.is_whitespace() || c.is_ascii_punctuation() {
        '_'
      } else {
        c
      }
    })
    .collect()
}

pub(crate) fn state_file_name(name: &str) -> String {
  format!("{}.json", file_stem(name))
}

pub(crate) fn keys_file_name(name: &str) -> String {
  format!("keys_for_{}.json", file_stem(name))
}

/// Writes `bytes` next to `path` and renames the result over it, so readers
/// never see a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
  }
  let temp_path = path.with_extension("json.tmp");
  fs::write(&temp_path, bytes).map_err(|e| PersistError::io(&temp_path, e))?;
  fs::rename(&temp_path, path).map_err(|e| {
    let _ = fs::remove_file(&temp_path);
    PersistError::io(path, e)
  })
}

/// Reads `path`, treating a missing file as `None`.
fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
  match fs::read(path) {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(PersistError::io(path, e)),
  }
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
  Duration::try_from_secs_f64(secs).ok()
}

// --- Keys-only persistence. Only the key type has to be serializable. ---

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn state_path(&self) -> Result<PathBuf> {
    self
      .storage_dir
      .as_ref()
      .map(|dir| dir.join(state_file_name(&self.name)))
      .ok_or(PersistError::NoStorageDir)
  }

  pub(crate) fn keys_path(&self) -> Result<PathBuf> {
    self
      .storage_dir
      .as_ref()
      .map(|dir| dir.join(keys_file_name(&self.name)))
      .ok_or(PersistError::NoStorageDir)
  }

  /// Dirty, and either never saved or last saved long enough ago.
  pub(crate) fn needs_save(&self) -> bool {
    let state = self.lock();
    state.dirty && self.save_interval_elapsed(state.last_save_time)
  }

  /// Like [`needs_save`](Self::needs_save), timed from the last keys save.
  pub(crate) fn needs_keys_save(&self) -> bool {
    let state = self.lock();
    state.dirty && self.save_interval_elapsed(state.last_keys_save_time)
  }

  fn save_interval_elapsed(&self, last: Option<DateTime<Utc>>) -> bool {
    match last {
      None => true,
      Some(last) => self
        .clock
        .now()
        .signed_duration_since(last)
        .to_std()
        .map_or(false, |elapsed| elapsed > MIN_SAVE_INTERVAL),
    }
  }

  /// Records a successful keys save.
  ///
  /// The keys file is the only saved artifact of a memory-only cache and of a
  /// cache without a full-state hook, so for those it also counts as a save
  /// and clears the dirty flag when nothing changed since `generation`.
  fn mark_keys_saved(&self, generation: Option<u64>) {
    let now = self.clock.now();
    let mut state = self.lock();
    state.last_keys_save_time = Some(now);
    if state.memory_only || self.hooks.save_state.is_none() {
      state.last_save_time = Some(now);
      if generation.map_or(true, |g| g == state.generation) {
        state.dirty = false;
      }
    }
  }

  fn record_save_failure(&self, what: &str, err: &PersistError) {
    Metrics::add(&self.metrics.save_failures, 1);
    tracing::error!(cache = %self.name, error = %err, "{what} failed");
  }
}

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
  V: Send + Sync + 'static,
{
  /// Writes the keys, oldest first, as a JSON array.
  pub(crate) fn try_save_keys(&self) -> Result<()> {
    let _io = self.io_lock.lock();
    let (keys, generation) = {
      let state = self.lock();
      if state.memory_only {
        drop(state);
        self.mark_keys_saved(None);
        return Ok(());
      }
      (state.store.ordered_keys(), state.generation)
    };
    let path = self.keys_path()?;
    let bytes = serde_json::to_vec(&keys).map_err(|e| PersistError::json(&path, e))?;
    write_atomic(&path, &bytes)?;
    self.mark_keys_saved(Some(generation));
    tracing::info!(cache = %self.name, keys = keys.len(), size = bytes.len(), path = %path.display(), "saved keys");
    Ok(())
  }

  pub(crate) fn save_keys(&self) -> bool {
    match self.try_save_keys() {
      Ok(()) => true,
      Err(err) => {
        self.record_save_failure("saving keys", &err);
        false
      }
    }
  }
}

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + DeserializeOwned + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn try_load_keys(&self) -> Result<Option<Vec<K>>> {
    if self.lock().memory_only {
      return Ok(None);
    }
    let path = self.keys_path()?;
    let Some(bytes) = read_if_exists(&path)? else {
      tracing::debug!(cache = %self.name, path = %path.display(), "no saved keys");
      return Ok(None);
    };
    let keys: Vec<K> = serde_json::from_slice(&bytes).map_err(|e| PersistError::json(&path, e))?;
    tracing::info!(cache = %self.name, keys = keys.len(), "loaded keys");
    Ok(Some(keys))
  }

  pub(crate) fn load_keys(&self) -> Option<Vec<K>> {
    self.try_load_keys().unwrap_or_else(|err| {
      tracing::warn!(cache = %self.name, error = %err, "loading keys failed");
      None
    })
  }
}

// --- Full-state persistence. ---

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
  V: Send + Sync + Serialize + 'static,
{
  /// Writes the full state. Returns `false` when a memory-only cache skipped
  /// the write.
  pub(crate) fn try_save(&self) -> Result<bool> {
    let _io = self.io_lock.lock();
    let (path, bytes, generation) = {
      let state = self.lock();
      if state.memory_only {
        drop(state);
        self.mark_saved(None);
        return Ok(false);
      }

      let path = self.state_path()?;
      let record = CacheRecordRef {
        save_timeout: state
          .auto_save
          .unwrap_or(crate::shared::DEFAULT_AUTO_SAVE_TIMEOUT)
          .as_secs_f64(),
        max_size: state.store.max_size(),
        flush_to_size: state.store.flush_to_size(),
        items: state
          .store
          .entries()
          .map(|(key, entry)| {
            let stored = StoredEntryRef {
              value: entry.value.as_ref(),
              date: entry.inserted_at,
            };
            (key, stored)
          })
          .collect(),
        latest_keys: state.store.ordered_keys(),
        name: &self.name,
        is_log: state.log_enabled,
        oldest_items_dates: state.store.oldest_dates().copied().collect(),
        is_saves_dates: state.tracks_ages,
        is_flush_items_older_than: state.max_age.map(|age| age.as_secs_f64()),
      };
      let bytes = serde_json::to_vec(&record).map_err(|e| PersistError::json(&path, e))?;
      (path, bytes, state.generation)
    };

    write_atomic(&path, &bytes)?;
    self.mark_saved(Some(generation));
    tracing::info!(cache = %self.name, size = bytes.len(), path = %path.display(), "saved");
    Ok(true)
  }

  /// Records a successful save. The dirty flag is only cleared when nothing
  /// changed since the snapshot of `generation` was taken.
  fn mark_saved(&self, generation: Option<u64>) {
    let now = self.clock.now();
    let mut state = self.lock();
    state.last_save_time = Some(now);
    if generation.map_or(true, |g| g == state.generation) {
      state.dirty = false;
    }
    Metrics::add(&self.metrics.saves, 1);
  }

  pub(crate) fn save(&self) -> bool {
    match self.try_save() {
      Ok(_) => true,
      Err(err) => {
        self.record_save_failure("saving", &err);
        false
      }
    }
  }

  pub(crate) fn save_if_needed(&self) -> bool {
    self.needs_save() && self.save()
  }
}

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + DeserializeOwned + 'static,
  V: Send + Sync + DeserializeOwned + 'static,
{
  /// Replaces the content with the saved state. `Ok(false)` when nothing was
  /// saved yet.
  ///
  /// A memory-only cache reads nothing, keeps its content and reports success.
  pub(crate) fn try_load(&self) -> Result<bool> {
    {
      let mut state = self.lock();
      if state.memory_only {
        state.dirty = false;
        tracing::debug!(cache = %self.name, "memory only; load skipped");
        return Ok(true);
      }
    }
    let path = self.state_path()?;
    let Some(bytes) = read_if_exists(&path)? else {
      tracing::debug!(cache = %self.name, path = %path.display(), "nothing to load");
      return Ok(false);
    };
    let record: CacheRecord<K, V> =
      serde_json::from_slice(&bytes).map_err(|e| PersistError::json(&path, e))?;
    if record.name != *self.name {
      return Err(PersistError::NameMismatch {
        expected: self.name.to_string(),
        found: record.name,
      });
    }

    let max_age = record.is_flush_items_older_than.and_then(seconds_to_duration);
    self.mutate(|shared, state, effects| {
      if state.store.max_size() != record.max_size {
        tracing::info!(cache = %shared.name, max_size = record.max_size, "max size changed by load");
      }
      if state.log_enabled != record.is_log {
        tracing::info!(cache = %shared.name, log = record.is_log, "logging changed by load");
      }
      state.log_enabled = record.is_log;
      state.tracks_ages = record.is_saves_dates;
      state.max_age = max_age;

      let entries = record
        .items
        .into_iter()
        .map(|(key, stored)| (key, CacheEntry::new(Arc::new(stored.value), stored.date)));
      let repairs = state
        .store
        .restore(entries, record.latest_keys, record.oldest_items_dates);
      if repairs > 0 {
        tracing::warn!(cache = %shared.name, repairs, "saved key order disagreed with saved items; repaired");
      }

      state.dirty = false;
      let mut evicted = state.store.set_max_size(record.max_size);
      evicted.extend(state.store.set_flush_to_size(record.flush_to_size));
      shared.after_eviction(state, evicted, effects);
      effects.request_sweep();
      tracing::info!(cache = %shared.name, count = state.store.len(), "loaded");
    });
    Metrics::add(&self.metrics.loads, 1);
    Ok(true)
  }

  pub(crate) fn load(&self) -> bool {
    match self.try_load() {
      Ok(loaded) => loaded,
      Err(err) => {
        Metrics::add(&self.metrics.load_failures, 1);
        tracing::warn!(cache = %self.name, error = %err, "loading failed");
        false
      }
    }
  }
}

// --- Public handle API ---

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Where the full state of this cache is saved.
  pub fn state_path(&self) -> Result<PathBuf> {
    self.shared.state_path()
  }

  /// Where the keys of this cache are saved.
  pub fn keys_path(&self) -> Result<PathBuf> {
    self.shared.keys_path()
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
  V: Send + Sync + 'static,
{
  /// Saves the keys, oldest first. Memory-only caches skip the write.
  ///
  /// When the keys file is the cache's only saved artifact (a memory-only
  /// cache, or one built without a full-state save) this clears the dirty
  /// flag and updates [`last_save_time`](Self::last_save_time).
  pub fn save_keys(&self) -> bool {
    self.shared.save_keys()
  }

  pub fn try_save_keys(&self) -> Result<()> {
    self.shared.try_save_keys()
  }

  /// Saves the keys when the cache is dirty and its keys were not saved in the
  /// last second.
  pub fn save_keys_if_needed(&self) -> bool {
    self.shared.needs_keys_save() && self.shared.save_keys()
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + DeserializeOwned + 'static,
  V: Send + Sync + 'static,
{
  /// Reads back the keys written by [`save_keys`](Self::save_keys).
  ///
  /// `None` when no keys were saved, the file could not be read, or the cache
  /// is memory-only.
  pub fn load_keys(&self) -> Option<Vec<K>> {
    self.shared.load_keys()
  }

  pub fn try_load_keys(&self) -> Result<Option<Vec<K>>> {
    self.shared.try_load_keys()
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
  V: Send + Sync + Serialize + 'static,
{
  /// Saves the full state. Failures are logged and reported as `false`.
  ///
  /// A memory-only cache writes nothing but still counts as saved.
  pub fn save(&self) -> bool {
    self.shared.save()
  }

  /// Like [`save`](Self::save), returning the failure. `Ok(false)` means a
  /// memory-only cache skipped the write.
  pub fn try_save(&self) -> Result<bool> {
    self.shared.try_save()
  }

  /// Saves when the cache is dirty and was not saved in the last second.
  pub fn save_if_needed(&self) -> bool {
    self.shared.save_if_needed()
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + DeserializeOwned + 'static,
  V: Send + Sync + DeserializeOwned + 'static,
{
  /// Replaces the content with the saved state.
  ///
  /// Returns `false` when there is no saved state, it belongs to another
  /// cache name, or it could not be read. A memory-only cache reads nothing
  /// and returns `true`.
  pub fn load(&self) -> bool {
    self.shared.load()
  }

  pub fn try_load(&self) -> Result<bool> {
    self.shared.try_load()
  }
}

// --- Persistent build methods ---
// These blocks carry the serde bounds, so only they can install save hooks.

impl<K, V> CacheBuilder<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
  V: Send + Sync + Serialize + DeserializeOwned + 'static,
{
  /// Builds a cache that can save and load its full state.
  ///
  /// Honours [`attempt_load`](Self::attempt_load) and
  /// [`auto_save`](Self::auto_save). A failed initial load leaves the cache
  /// empty.
  pub fn build_persistent(self) -> Cache<K, V> {
    let attempt_load = self.attempt_load;
    let hooks = PersistHooks {
      save_state: Some(CacheShared::<K, V>::save),
      save_keys: Some(CacheShared::<K, V>::save_keys),
    };
    let shared = self.build_shared(hooks);
    if attempt_load {
      shared.load();
    }
    Cache { shared }
  }
}

impl<K, V> CacheBuilder<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + Serialize + 'static,
  V: Send + Sync + 'static,
{
  /// Builds a cache that saves its keys when memory pressure clears it, for
  /// values that cannot be serialized.
  pub fn build_keys_persistent(self) -> Cache<K, V> {
    if self.auto_save.is_some() || self.attempt_load {
      tracing::warn!(
        cache = %self.name,
        "auto-save and initial load need a fully persistent cache; ignoring them"
      );
    }
    let hooks = PersistHooks {
      save_state: None,
      save_keys: Some(CacheShared::<K, V>::save_keys),
    };
    Cache {
      shared: self.build_shared(hooks),
    }
  }
}
