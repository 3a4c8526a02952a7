use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for a cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) updates: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Eviction / Expiration ---
  pub(crate) evicted_by_size: CachePadded<AtomicU64>,
  pub(crate) expired_by_age: CachePadded<AtomicU64>,
  pub(crate) memory_pressure_clears: CachePadded<AtomicU64>,

  // --- Persistence ---
  pub(crate) saves: CachePadded<AtomicU64>,
  pub(crate) save_failures: CachePadded<AtomicU64>,
  pub(crate) loads: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,

  // --- Observers ---
  pub(crate) notifications: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      inserts: CachePadded::new(AtomicU64::new(0)),
      updates: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      evicted_by_size: CachePadded::new(AtomicU64::new(0)),
      expired_by_age: CachePadded::new(AtomicU64::new(0)),
      memory_pressure_clears: CachePadded::new(AtomicU64::new(0)),
      saves: CachePadded::new(AtomicU64::new(0)),
      save_failures: CachePadded::new(AtomicU64::new(0)),
      loads: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      notifications: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn add(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      inserts: self.inserts.load(Ordering::Relaxed),
      updates: self.updates.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      evicted_by_size: self.evicted_by_size.load(Ordering::Relaxed),
      expired_by_age: self.expired_by_age.load(Ordering::Relaxed),
      memory_pressure_clears: self.memory_pressure_clears.load(Ordering::Relaxed),
      saves: self.saves.load(Ordering::Relaxed),
      save_failures: self.save_failures.load(Ordering::Relaxed),
      loads: self.loads.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      notifications: self.notifications.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a cache's metrics.
#[derive(Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
  /// Writes of keys that were not present.
  pub inserts: u64,
  /// Writes that replaced the value of an existing key.
  pub updates: u64,
  /// Explicit removals of a single key.
  pub removals: u64,
  /// Entries dropped to respect the size bound.
  pub evicted_by_size: u64,
  /// Entries dropped because they outlived the maximum age.
  pub expired_by_age: u64,
  /// How many times a memory-pressure broadcast emptied this cache.
  pub memory_pressure_clears: u64,
  /// Successful saves, including skipped writes of memory-only caches.
  pub saves: u64,
  pub save_failures: u64,
  /// Loads that applied a stored record.
  pub loads: u64,
  pub load_failures: u64,
  /// Listener callbacks invoked.
  pub notifications: u64,
  /// The number of seconds the cache has existed.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("inserts", &self.inserts)
      .field("updates", &self.updates)
      .field("removals", &self.removals)
      .field("evicted_by_size", &self.evicted_by_size)
      .field("expired_by_age", &self.expired_by_age)
      .field("memory_pressure_clears", &self.memory_pressure_clears)
      .field("saves", &self.saves)
      .field("save_failures", &self.save_failures)
      .field("loads", &self.loads)
      .field("load_failures", &self.load_failures)
      .field("notifications", &self.notifications)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
