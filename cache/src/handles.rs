use crate::listener::{CacheListener, ListenerId};
use crate::shared::CacheShared;
use crate::store::AgeRefresh;
use crate::{CacheBuilder, MetricsSnapshot};

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A thread-safe, bounded cache with age tracking, change notification and
/// optional disk persistence.
///
/// `Cache` is a cheap handle: clones share the same underlying cache. The
/// cache is torn down when the last handle is dropped. Pending auto-saves are
/// cancelled at that point, so callers needing durability must save first.
#[derive(Debug)]
pub struct Cache<K, V>
where
  K: Eq + Hash + Clone + Send,
  V: Send + Sync,
{
  pub(crate) shared: Arc<CacheShared<K, V>>,
}

impl<K, V> Clone for Cache<K, V>
where
  K: Eq + Hash + Clone + Send,
  V: Send + Sync,
{
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, V> Cache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Creates an in-memory cache with default settings.
  ///
  /// Use [`CacheBuilder`] for age tracking, persistence or auto-save.
  pub fn new(name: impl Into<String>, max_size: usize, flush_to_size: Option<usize>) -> Self {
    let mut builder = CacheBuilder::new(name).max_size(max_size);
    if let Some(target) = flush_to_size {
      builder = builder.flush_to_size(target);
    }
    builder.build()
  }

  /// The unique name of this cache, also used as its file stem.
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  // --- Reads ---

  /// Returns the value stored under `key`. Never evicts or expires anything.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    self.shared.lock().store.get(key).map(|entry| entry.value())
  }

  /// Returns the values of the requested keys that are present.
  pub fn get_many<'a, I>(&self, keys: I) -> HashMap<K, Arc<V>>
  where
    I: IntoIterator<Item = &'a K>,
    K: 'a,
  {
    let state = self.shared.lock();
    keys
      .into_iter()
      .filter_map(|key| state.store.get(key).map(|entry| (key.clone(), entry.value())))
      .collect()
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.shared.lock().store.contains_key(key)
  }

  /// The insertion timestamp of `key`, when the cache tracks ages.
  pub fn inserted_at(&self, key: &K) -> Option<DateTime<Utc>> {
    self.shared.lock().store.get(key).and_then(|entry| entry.inserted_at)
  }

  /// A snapshot of all keys, in no particular order.
  pub fn keys(&self) -> Vec<K> {
    self.shared.lock().store.keys()
  }

  /// A snapshot of all keys from the oldest to the newest first insertion.
  pub fn keys_by_insertion(&self) -> Vec<K> {
    self.shared.lock().store.ordered_keys()
  }

  pub fn values(&self) -> Vec<Arc<V>> {
    self.shared.lock().store.values()
  }

  pub fn len(&self) -> usize {
    self.shared.lock().store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  // --- Writes ---

  /// Inserts or overwrites `key`.
  ///
  /// An existing key keeps its eviction position: eviction is oldest first by
  /// *first* insertion. The size bound holds when this returns.
  pub fn set(&self, key: K, value: V) {
    self.set_arc(key, Arc::new(value));
  }

  /// Same as [`set`](Self::set) for a value that is already shared.
  pub fn set_arc(&self, key: K, value: Arc<V>) {
    self
      .shared
      .mutate(|shared, state, effects| shared.insert_locked(state, key, value, effects));
  }

  /// Alias of [`set`](Self::set).
  #[inline]
  pub fn insert(&self, key: K, value: V) {
    self.set(key, value);
  }

  /// Removes `key`, returning its value. Absent keys cause no notification.
  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self
      .shared
      .mutate(|shared, state, effects| shared.remove_locked(state, key, effects))
  }

  /// Removes every entry and notifies listeners that the cache was cleared.
  pub fn clear(&self) {
    self.shared.mutate(|shared, state, effects| {
      shared.clear_locked::<std::collections::hash_map::RandomState>(state, None, effects)
    });
  }

  /// Removes every entry whose key is not in `keep`.
  ///
  /// An empty `keep` set is a full [`clear`](Self::clear). Otherwise no
  /// "cleared" event is emitted.
  pub fn clear_except<S: BuildHasher>(&self, keep: &HashSet<K, S>) {
    self
      .shared
      .mutate(|shared, state, effects| shared.clear_locked(state, Some(keep), effects));
  }

  /// Drops in-memory content without marking the cache dirty or notifying.
  pub fn clear_memory(&self) {
    let mut state = self.shared.lock();
    self
      .shared
      .clear_memory_locked::<std::collections::hash_map::RandomState>(&mut state, None);
  }

  /// Removes entries inserted strictly before `cutoff` and returns how many.
  ///
  /// Returns 0 when the cache does not track ages. Listeners are not
  /// notified; only the dirty flag changes.
  pub fn clear_before(&self, cutoff: DateTime<Utc>) -> usize {
    self
      .shared
      .mutate(|shared, state, effects| shared.clear_before_locked(state, cutoff, effects))
  }

  /// Removes entries older than `age` and returns how many.
  pub fn clear_older_than(&self, age: Duration) -> usize {
    self
      .shared
      .mutate(|shared, state, effects| shared.clear_older_than_locked(state, age, effects))
  }

  /// Expires entries older than [`max_age`](Self::max_age) now, without
  /// waiting for the debounced sweep.
  pub fn sweep_expired(&self) -> usize {
    self.shared.sweep_expired()
  }

  // --- Configuration ---

  pub fn max_size(&self) -> usize {
    self.shared.lock().store.max_size()
  }

  /// Changes the size bound (minimum 1) and evicts immediately.
  ///
  /// `flush_to_size` is pulled below the new bound when needed.
  pub fn set_max_size(&self, max_size: usize) {
    self.shared.mutate(|shared, state, effects| {
      let evicted = state.store.set_max_size(max_size);
      shared.after_eviction(state, evicted, effects);
      effects.request_sweep();
    });
  }

  pub fn flush_to_size(&self) -> Option<usize> {
    self.shared.lock().store.flush_to_size()
  }

  /// Changes the batch-eviction target (clamped to `max_size`) and evicts immediately.
  pub fn set_flush_to_size(&self, flush_to_size: Option<usize>) {
    self.shared.mutate(|shared, state, effects| {
      let evicted = state.store.set_flush_to_size(flush_to_size);
      shared.after_eviction(state, evicted, effects);
    });
  }

  pub fn tracks_ages(&self) -> bool {
    self.shared.lock().tracks_ages
  }

  /// Turns insertion timestamps on or off. Entries inserted while ages were
  /// not tracked count as expired for age-based clearing.
  pub fn set_tracks_ages(&self, tracks_ages: bool) {
    self.shared.mutate(|shared, state, effects| {
      if state.tracks_ages != tracks_ages {
        state.tracks_ages = tracks_ages;
        shared.mark_dirty(state, effects);
        effects.request_sweep();
      }
    });
  }

  pub fn max_age(&self) -> Option<Duration> {
    self.shared.lock().max_age
  }

  pub fn set_max_age(&self, max_age: Option<Duration>) {
    self.shared.mutate(|shared, state, effects| {
      if state.max_age != max_age {
        state.max_age = max_age;
        shared.mark_dirty(state, effects);
        effects.request_sweep();
      }
    });
  }

  pub fn age_refresh(&self) -> AgeRefresh {
    self.shared.age_refresh
  }

  pub fn is_memory_only(&self) -> bool {
    self.shared.lock().memory_only
  }

  /// A memory-only cache skips all disk writes but reports them as successful.
  pub fn set_memory_only(&self, memory_only: bool) {
    self.shared.lock().memory_only = memory_only;
  }

  pub fn log_enabled(&self) -> bool {
    self.shared.lock().log_enabled
  }

  /// Enables per-mutation debug logging for this cache.
  pub fn set_log_enabled(&self, log_enabled: bool) {
    self.shared.lock().log_enabled = log_enabled;
  }

  /// The auto-save delay, if auto-save is enabled.
  pub fn auto_save_timeout(&self) -> Option<Duration> {
    self.shared.lock().auto_save
  }

  /// Enables (with a 30 ms floor) or disables auto-save. Only caches built
  /// with [`CacheBuilder::build_persistent`] ever save.
  pub fn set_auto_save_timeout(&self, timeout: Option<Duration>) {
    if timeout.is_some() && self.shared.hooks.save_state.is_none() {
      tracing::warn!(cache = %self.shared.name, "auto-save has no effect on a cache without persistence");
    }
    self.shared.lock().auto_save = timeout.map(|t| t.max(crate::shared::MIN_AUTO_SAVE_TIMEOUT));
  }

  // --- Persistence state ---

  /// Whether the in-memory state diverged from the last successful save.
  pub fn is_dirty(&self) -> bool {
    self.shared.lock().dirty
  }

  pub fn last_save_time(&self) -> Option<DateTime<Utc>> {
    self.shared.lock().last_save_time
  }

  // --- Observers ---

  /// Registers a listener. The cache only holds it weakly.
  pub fn add_listener<L>(&self, listener: &Arc<L>) -> ListenerId
  where
    L: CacheListener<K, V> + 'static,
  {
    self.shared.listeners.add(listener)
  }

  pub fn remove_listener(&self, id: ListenerId) -> bool {
    self.shared.listeners.remove(id)
  }

  /// The number of registered listeners that are still alive.
  pub fn listener_count(&self) -> usize {
    self.shared.listeners.live_count()
  }

  /// Checks that the entry map and the insertion order agree. Disagreements
  /// are logged as warnings.
  pub fn validate(&self) -> bool {
    let state = self.shared.lock();
    self.shared.validate_locked(&state)
  }
}
