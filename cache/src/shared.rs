use crate::debounce::Debouncer;
use crate::listener::{CacheEvent, ListenerRegistry};
use crate::metrics::Metrics;
use crate::pressure::{self, MemoryPressureResponder, Registration};
use crate::store::{AgeRefresh, BoundedStore, Upsert};
use crate::task::notifier::Notifier;
use crate::time::{self, Clock};

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

/// Threshold of the debounced age sweep.
pub(crate) const AGE_SWEEP_THRESHOLD: Duration = Duration::from_millis(200);
/// Default delay between the last mutation and the auto-save pass.
pub(crate) const DEFAULT_AUTO_SAVE_TIMEOUT: Duration = Duration::from_millis(300);
/// Auto-save never fires sooner than this after a mutation.
pub(crate) const MIN_AUTO_SAVE_TIMEOUT: Duration = Duration::from_millis(30);

/// A type-erased persistence entry point, captured where the serde bounds hold.
pub(crate) type SaveHook<K, V> = fn(&CacheShared<K, V>) -> bool;

pub(crate) struct PersistHooks<K: Eq + Hash + Clone + Send, V: Send + Sync> {
  pub(crate) save_state: Option<SaveHook<K, V>>,
  pub(crate) save_keys: Option<SaveHook<K, V>>,
}

impl<K: Eq + Hash + Clone + Send, V: Send + Sync> PersistHooks<K, V> {
  pub(crate) fn none() -> Self {
    Self {
      save_state: None,
      save_keys: None,
    }
  }
}

/// Everything the cache mutex guards.
pub(crate) struct CacheState<K: Eq + Hash + Clone, V> {
  pub(crate) store: BoundedStore<K, V>,
  pub(crate) tracks_ages: bool,
  pub(crate) max_age: Option<Duration>,
  pub(crate) dirty: bool,
  /// Bumped on every dirtying mutation, so a save can tell whether it raced one.
  pub(crate) generation: u64,
  pub(crate) last_save_time: Option<DateTime<Utc>>,
  pub(crate) last_keys_save_time: Option<DateTime<Utc>>,
  pub(crate) memory_only: bool,
  pub(crate) log_enabled: bool,
  pub(crate) auto_save: Option<Duration>,
  outbox: VecDeque<CacheEvent<K, V>>,
}

/// Side effects a locked operation asks for once the lock is released.
#[derive(Debug, Default)]
pub(crate) struct Effects {
  auto_save: Option<Duration>,
  sweep: bool,
}

impl Effects {
  pub(crate) fn request_sweep(&mut self) {
    self.sweep = true;
  }
}

pub(crate) struct StateConfig {
  pub(crate) max_size: usize,
  pub(crate) flush_to_size: Option<usize>,
  pub(crate) tracks_ages: bool,
  pub(crate) max_age: Option<Duration>,
  pub(crate) memory_only: bool,
  pub(crate) log_enabled: bool,
  pub(crate) auto_save: Option<Duration>,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
  pub(crate) fn new(config: StateConfig) -> Self {
    Self {
      store: BoundedStore::new(config.max_size, config.flush_to_size),
      tracks_ages: config.tracks_ages,
      max_age: config.max_age,
      dirty: false,
      generation: 0,
      last_save_time: None,
      last_keys_save_time: None,
      memory_only: config.memory_only,
      log_enabled: config.log_enabled,
      auto_save: config.auto_save.map(|t| t.max(MIN_AUTO_SAVE_TIMEOUT)),
      outbox: VecDeque::new(),
    }
  }
}

/// The pieces the builder hands to [`CacheShared::new_arc`].
pub(crate) struct SharedParts<K: Eq + Hash + Clone + Send, V: Send + Sync> {
  pub(crate) name: String,
  pub(crate) state: StateConfig,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) debouncer: Arc<Debouncer>,
  pub(crate) storage_dir: Option<PathBuf>,
  pub(crate) age_refresh: AgeRefresh,
  pub(crate) background_delivery: bool,
  pub(crate) hooks: PersistHooks<K, V>,
}

/// The internal, thread-safe core of a cache.
pub(crate) struct CacheShared<K: Eq + Hash + Clone + Send, V: Send + Sync> {
  pub(crate) name: Arc<str>,
  /// Distinguishes caches that share a name, e.g. a cache and its reloaded
  /// successor, in the debouncer's keys.
  instance: u64,
  pub(crate) state: Mutex<CacheState<K, V>>,
  pub(crate) listeners: Arc<ListenerRegistry<K, V>>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) debouncer: Arc<Debouncer>,
  pub(crate) storage_dir: Option<PathBuf>,
  pub(crate) age_refresh: AgeRefresh,
  pub(crate) hooks: PersistHooks<K, V>,
  /// Serializes disk writes so snapshots reach the disk in the order taken.
  pub(crate) io_lock: Mutex<()>,
  notifier: Option<Notifier<K, V>>,
  delivery_lock: Mutex<()>,
  self_ref: Weak<Self>,
  _registration: Option<Registration>,
}

impl<K: Eq + Hash + Clone + Send, V: Send + Sync> fmt::Debug for CacheShared<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CacheShared")
      .field("name", &self.name)
      .field("store", &state.store)
      .field("tracks_ages", &state.tracks_ages)
      .field("max_age", &state.max_age)
      .field("dirty", &state.dirty)
      .field("memory_only", &state.memory_only)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K: Eq + Hash + Clone + Send, V: Send + Sync> Drop for CacheShared<K, V> {
  fn drop(&mut self) {
    // No implicit final save.
    self.debouncer.cancel(&self.auto_save_key());
    self.debouncer.cancel(&self.age_sweep_key());
  }
}

impl<K: Eq + Hash + Clone + Send, V: Send + Sync> CacheShared<K, V> {
  pub(crate) fn auto_save_key(&self) -> String {
    format!("{}_auto_save#{}", self.name, self.instance)
  }

  pub(crate) fn age_sweep_key(&self) -> String {
    format!("{}_age_sweep#{}", self.name, self.instance)
  }
}

fn next_instance() -> u64 {
  static NEXT: AtomicU64 = AtomicU64::new(0);
  NEXT.fetch_add(1, Ordering::Relaxed)
}

impl<K, V> CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn new_arc(parts: SharedParts<K, V>) -> Arc<Self> {
    let name: Arc<str> = Arc::from(parts.name.as_str());
    let listeners = Arc::new(ListenerRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let notifier = parts
      .background_delivery
      .then(|| Notifier::spawn(Arc::clone(&name), Arc::clone(&listeners), Arc::clone(&metrics)));

    Arc::new_cyclic(|weak: &Weak<Self>| {
      let responder: Weak<dyn MemoryPressureResponder> = weak.clone();
      Self {
        name,
        instance: next_instance(),
        state: Mutex::new(CacheState::new(parts.state)),
        listeners,
        metrics,
        clock: parts.clock,
        debouncer: parts.debouncer,
        storage_dir: parts.storage_dir,
        age_refresh: parts.age_refresh,
        hooks: parts.hooks,
        io_lock: Mutex::new(()),
        notifier,
        delivery_lock: Mutex::new(()),
        self_ref: weak.clone(),
        _registration: Some(pressure::register(responder)),
      }
    })
  }

  #[inline]
  pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
    self.state.lock()
  }

  /// Runs `op` under the state lock, then applies its effects and delivers
  /// the events it queued.
  pub(crate) fn mutate<R>(&self, op: impl FnOnce(&Self, &mut CacheState<K, V>, &mut Effects) -> R) -> R {
    let mut effects = Effects::default();
    let result = {
      let mut state = self.lock();
      op(self, &mut *state, &mut effects)
    };
    self.finish(effects);
    result
  }

  pub(crate) fn finish(&self, effects: Effects) {
    if let Some(timeout) = effects.auto_save {
      self.schedule_auto_save(timeout);
    }
    if effects.sweep {
      self.schedule_age_sweep();
    }
    self.deliver_pending();
  }

  // --- Locked helpers. Each takes the already-locked state. ---

  pub(crate) fn mark_dirty(&self, state: &mut CacheState<K, V>, effects: &mut Effects) {
    state.dirty = true;
    state.generation = state.generation.wrapping_add(1);
    if state.auto_save.is_some() && self.hooks.save_state.is_some() {
      effects.auto_save = state.auto_save;
    }
  }

  fn emit(&self, state: &mut CacheState<K, V>, event: CacheEvent<K, V>) {
    state.outbox.push_back(event);
  }

  pub(crate) fn after_eviction(&self, state: &mut CacheState<K, V>, evicted: Vec<K>, effects: &mut Effects) {
    if evicted.is_empty() {
      return;
    }
    Metrics::add(&self.metrics.evicted_by_size, evicted.len());
    if state.log_enabled {
      tracing::debug!(
        cache = %self.name,
        evicted = evicted.len(),
        remaining = state.store.len(),
        "flushed to size"
      );
    }
    #[cfg(debug_assertions)]
    self.validate_locked(state);

    self.emit(state, CacheEvent::ItemsRemoved(evicted));
    self.mark_dirty(state, effects);
  }

  pub(crate) fn validate_locked(&self, state: &CacheState<K, V>) -> bool {
    let issues = state.store.inconsistencies();
    for issue in &issues {
      tracing::warn!(cache = %self.name, count = state.store.len(), "consistency check: {issue}");
    }
    issues.is_empty()
  }

  fn wants_sweep(state: &CacheState<K, V>) -> bool {
    state.tracks_ages && state.max_age.is_some()
  }

  pub(crate) fn insert_locked(
    &self,
    state: &mut CacheState<K, V>,
    key: K,
    value: Arc<V>,
    effects: &mut Effects,
  ) {
    let evicted = state.store.evict_overflow();
    self.after_eviction(state, evicted, effects);

    let now = state.tracks_ages.then(|| self.clock.now());
    let outcome = state.store.upsert(key.clone(), Arc::clone(&value), now, self.age_refresh);
    match outcome {
      Upsert::Inserted => Metrics::add(&self.metrics.inserts, 1),
      Upsert::Updated => Metrics::add(&self.metrics.updates, 1),
    }
    if state.log_enabled {
      tracing::debug!(cache = %self.name, count = state.store.len(), ?outcome, "added item");
    }
    self.emit(state, CacheEvent::ItemUpdated { key, value });

    let evicted = state.store.evict_overflow();
    self.after_eviction(state, evicted, effects);

    self.mark_dirty(state, effects);
    if Self::wants_sweep(state) {
      effects.request_sweep();
    }
  }

  pub(crate) fn remove_locked(
    &self,
    state: &mut CacheState<K, V>,
    key: &K,
    effects: &mut Effects,
  ) -> Option<Arc<V>> {
    let entry = state.store.remove(key)?;
    Metrics::add(&self.metrics.removals, 1);
    if state.log_enabled {
      tracing::debug!(cache = %self.name, count = state.store.len(), "removed item");
    }
    self.emit(state, CacheEvent::ItemsRemoved(vec![key.clone()]));
    self.mark_dirty(state, effects);
    Some(entry.value)
  }

  /// Drops in-memory content without touching the dirty flag or notifying.
  pub(crate) fn clear_memory_locked<S: BuildHasher>(
    &self,
    state: &mut CacheState<K, V>,
    except: Option<&HashSet<K, S>>,
  ) -> usize {
    let removed = match except {
      Some(keep) if !keep.is_empty() => state.store.retain_keys(keep),
      _ => {
        let count = state.store.len();
        state.store.clear();
        count
      }
    };
    if state.log_enabled {
      tracing::debug!(cache = %self.name, removed, count = state.store.len(), "memory cleared");
    }
    removed
  }

  pub(crate) fn clear_locked<S: BuildHasher>(
    &self,
    state: &mut CacheState<K, V>,
    except: Option<&HashSet<K, S>>,
    effects: &mut Effects,
  ) {
    let full = except.map_or(true, |keep| keep.is_empty());
    self.clear_memory_locked(state, except);
    self.mark_dirty(state, effects);
    if full {
      self.emit(state, CacheEvent::Cleared);
    }
  }

  pub(crate) fn clear_before_locked(
    &self,
    state: &mut CacheState<K, V>,
    cutoff: DateTime<Utc>,
    effects: &mut Effects,
  ) -> usize {
    if !state.tracks_ages {
      tracing::info!(cache = %self.name, "cannot clear by date: the cache does not track ages");
      return 0;
    }

    let removed = state.store.remove_inserted_before(cutoff).len();
    if removed > 0 {
      Metrics::add(&self.metrics.expired_by_age, removed);
      self.mark_dirty(state, effects);
    }
    removed
  }

  pub(crate) fn clear_older_than_locked(
    &self,
    state: &mut CacheState<K, V>,
    age: Duration,
    effects: &mut Effects,
  ) -> usize {
    let cutoff = time::sub_duration(self.clock.now(), age);
    self.clear_before_locked(state, cutoff, effects)
  }

  /// Expires entries older than the configured maximum age right away.
  pub(crate) fn sweep_expired(&self) -> usize {
    self.mutate(|shared, state, effects| {
      let Some(max_age) = state.max_age.filter(|_| state.tracks_ages) else {
        return 0;
      };
      let cleared = shared.clear_older_than_locked(state, max_age, effects);
      if cleared > 0 {
        tracing::info!(
          cache = %shared.name,
          cleared,
          remaining = state.store.len(),
          max_age_secs = max_age.as_secs_f64(),
          "expired items older than the maximum age"
        );
      }
      cleared
    })
  }

  // --- Scheduling ---

  pub(crate) fn schedule_age_sweep(&self) {
    let weak = self.self_ref.clone();
    self
      .debouncer
      .debounce(self.age_sweep_key(), AGE_SWEEP_THRESHOLD, move || {
        if let Some(shared) = weak.upgrade() {
          shared.sweep_expired();
        }
      });
  }

  fn schedule_auto_save(&self, timeout: Duration) {
    let Some(save_state) = self.hooks.save_state else {
      return;
    };
    let weak = self.self_ref.clone();
    self
      .debouncer
      .debounce(self.auto_save_key(), timeout.max(MIN_AUTO_SAVE_TIMEOUT), move || {
        let Some(shared) = weak.upgrade() else {
          return;
        };
        shared.sweep_expired();
        if shared.lock().dirty {
          tracing::debug!(cache = %shared.name, "auto-save pass");
          save_state(&shared);
        }
      });
  }

  // --- Delivery ---

  /// Delivers queued events in commit order.
  ///
  /// Only one thread drains at a time. A thread that finds the drain busy
  /// leaves its events to the active drainer, which re-checks the queue after
  /// letting go. This also covers listeners that call back into the cache.
  pub(crate) fn deliver_pending(&self) {
    loop {
      let Some(guard) = self.delivery_lock.try_lock() else {
        return;
      };
      loop {
        let next = self.lock().outbox.pop_front();
        match next {
          Some(event) => self.deliver(event),
          None => break,
        }
      }
      drop(guard);

      if self.lock().outbox.is_empty() {
        return;
      }
    }
  }

  fn deliver(&self, event: CacheEvent<K, V>) {
    match &self.notifier {
      Some(notifier) if !notifier.is_current_thread() => {
        if !notifier.send(event) {
          tracing::warn!(cache = %self.name, "notifier thread is gone; event dropped");
        }
      }
      _ => {
        let delivered = self.listeners.dispatch(&self.name, &event);
        Metrics::add(&self.metrics.notifications, delivered);
      }
    }
  }
}

impl<K, V> MemoryPressureResponder for CacheShared<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  fn responder_name(&self) -> &str {
    &self.name
  }

  fn on_memory_pressure(&self) {
    if let Some(save_keys) = self.hooks.save_keys {
      save_keys(self);
    }
    let removed = self.clear_memory_locked::<std::collections::hash_map::RandomState>(&mut self.lock(), None);
    Metrics::add(&self.metrics.memory_pressure_clears, 1);
    tracing::info!(cache = %self.name, removed, "cleared for memory pressure");
  }
}
