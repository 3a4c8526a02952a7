use crate::debounce::{self, Debouncer};
use crate::handles::Cache;
use crate::listener::Delivery;
use crate::shared::{CacheShared, PersistHooks, SharedParts, StateConfig};
use crate::store::AgeRefresh;
use crate::time::{Clock, SystemClock};

use core::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Name of the directory created under the user cache directory when no
/// storage directory is configured.
pub const DEFAULT_STORAGE_SUBDIR: &str = "fibre_stash";

/// Maximum entry age applied unless the builder says otherwise.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Entry count bound applied unless the builder says otherwise.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// A builder for creating [`Cache`] instances.
pub struct CacheBuilder<K, V> {
  pub(crate) name: String,
  pub(crate) max_size: usize,
  pub(crate) flush_to_size: Option<usize>,
  pub(crate) tracks_ages: bool,
  pub(crate) max_age: Option<Duration>,
  pub(crate) age_refresh: AgeRefresh,
  pub(crate) memory_only: bool,
  pub(crate) log_enabled: bool,
  pub(crate) storage_dir: Option<PathBuf>,
  pub(crate) auto_save: Option<Duration>,
  pub(crate) attempt_load: bool,
  pub(crate) delivery: Delivery,
  clock: Option<Arc<dyn Clock>>,
  debouncer: Option<Arc<Debouncer>>,
  _marker: PhantomData<fn() -> (K, V)>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V> fmt::Debug for CacheBuilder<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("max_size", &self.max_size)
      .field("flush_to_size", &self.flush_to_size)
      .field("tracks_ages", &self.tracks_ages)
      .field("max_age", &self.max_age)
      .field("memory_only", &self.memory_only)
      .field("storage_dir", &self.storage_dir)
      .field("auto_save", &self.auto_save)
      .field("attempt_load", &self.attempt_load)
      .field("delivery", &self.delivery)
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
// This impl block has no bounds on K or V.
impl<K, V> CacheBuilder<K, V> {
  /// Starts a builder for a cache with the given unique name.
  ///
  /// The name identifies the cache in logs and is the stem of its files on
  /// disk. Two live caches must not share a name.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      max_size: DEFAULT_MAX_SIZE,
      flush_to_size: None,
      tracks_ages: false,
      max_age: Some(DEFAULT_MAX_AGE),
      age_refresh: AgeRefresh::default(),
      memory_only: false,
      log_enabled: false,
      storage_dir: None,
      auto_save: None,
      attempt_load: false,
      delivery: Delivery::default(),
      clock: None,
      debouncer: None,
      _marker: PhantomData,
    }
  }

  /// Sets the maximum number of entries. Values below 1 are raised to 1.
  pub fn max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  /// Once the cache overflows, evict down to this many entries in one batch
  /// instead of removing only the overflow.
  pub fn flush_to_size(mut self, flush_to_size: usize) -> Self {
    self.flush_to_size = Some(flush_to_size);
    self
  }

  /// Stamps every entry with its insertion time so it can expire by age.
  pub fn tracks_ages(mut self, tracks_ages: bool) -> Self {
    self.tracks_ages = tracks_ages;
    self
  }

  /// Entries older than this are swept out. Only applies when ages are tracked.
  pub fn max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }

  /// Never expire entries by age.
  pub fn no_max_age(mut self) -> Self {
    self.max_age = None;
    self
  }

  pub fn age_refresh(mut self, age_refresh: AgeRefresh) -> Self {
    self.age_refresh = age_refresh;
    self
  }

  /// Turns saves into no-ops that still report success.
  pub fn memory_only(mut self, memory_only: bool) -> Self {
    self.memory_only = memory_only;
    self
  }

  /// Logs every mutation at debug level.
  pub fn log(mut self, enabled: bool) -> Self {
    self.log_enabled = enabled;
    self
  }

  /// Sets the directory that holds this cache's files.
  ///
  /// Defaults to `fibre_stash` under the user cache directory.
  pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.storage_dir = Some(dir.into());
    self
  }

  /// Injects the clock used for entry ages and save times.
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  /// Injects the debouncer that runs auto-saves and age sweeps.
  ///
  /// Defaults to the process-wide [`debounce::global`] instance.
  pub fn debouncer(mut self, debouncer: Arc<Debouncer>) -> Self {
    self.debouncer = Some(debouncer);
    self
  }

  /// Selects where listener callbacks run. Defaults to [`Delivery::Inline`].
  pub fn delivery(mut self, delivery: Delivery) -> Self {
    self.delivery = delivery;
    self
  }

  /// Saves automatically once `timeout` passes without further mutations.
  ///
  /// Timeouts below 30 ms are raised to 30 ms. Only takes effect on caches
  /// created with `build_persistent`.
  pub fn auto_save(mut self, timeout: Duration) -> Self {
    self.auto_save = Some(timeout);
    self
  }

  /// Auto-save with the default 300 ms timeout.
  pub fn auto_save_default(self) -> Self {
    self.auto_save(crate::shared::DEFAULT_AUTO_SAVE_TIMEOUT)
  }

  /// Loads the previously saved state while building. Only takes effect on
  /// caches created with `build_persistent`.
  pub fn attempt_load(mut self, attempt_load: bool) -> Self {
    self.attempt_load = attempt_load;
    self
  }

  /// The storage directory this builder will use, falling back to the user
  /// cache directory (or the home directory when there is none).
  pub(crate) fn resolved_storage_dir(&self) -> Option<PathBuf> {
    self.storage_dir.clone().or_else(|| {
      dirs::cache_dir()
        .or_else(dirs::home_dir)
        .map(|root| root.join(DEFAULT_STORAGE_SUBDIR))
    })
  }
}

// --- Build Methods ---
// This impl block carries the bounds needed to construct the cache.
impl<K, V> CacheBuilder<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Builds an in-memory cache.
  ///
  /// Such a cache never touches the disk: `auto_save` and `attempt_load`
  /// are ignored with a warning.
  pub fn build(self) -> Cache<K, V> {
    if self.auto_save.is_some() || self.attempt_load {
      tracing::warn!(
        cache = %self.name,
        "auto-save and initial load need a persistent cache; ignoring them"
      );
    }
    Cache {
      shared: self.build_shared(PersistHooks::none()),
    }
  }

  /// Central logic to construct the shared core of the cache.
  pub(crate) fn build_shared(self, hooks: PersistHooks<K, V>) -> Arc<CacheShared<K, V>> {
    let storage_dir = self.resolved_storage_dir();
    if storage_dir.is_none() && hooks.save_state.is_some() {
      tracing::warn!(cache = %self.name, "no storage directory could be resolved; saves will fail");
    }

    let auto_save = self.auto_save.filter(|_| hooks.save_state.is_some());
    let shared = CacheShared::new_arc(SharedParts {
      name: self.name,
      state: StateConfig {
        max_size: self.max_size,
        flush_to_size: self.flush_to_size,
        tracks_ages: self.tracks_ages,
        max_age: self.max_age,
        memory_only: self.memory_only,
        log_enabled: self.log_enabled,
        auto_save,
      },
      clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
      debouncer: self.debouncer.unwrap_or_else(debounce::global),
      storage_dir,
      age_refresh: self.age_refresh,
      background_delivery: self.delivery == Delivery::Background,
      hooks,
    });

    {
      let state = shared.lock();
      tracing::debug!(
        cache = %shared.name,
        max_size = state.store.max_size(),
        tracks_ages = state.tracks_ages,
        "cache created"
      );
    }
    shared
  }
}

impl<K, V> Default for CacheBuilder<K, V> {
  fn default() -> Self {
    Self::new("default")
  }
}
