use crate::entry::CacheEntry;
use crate::order::InsertionOrder;

use std::collections::VecDeque;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use ahash::HashMap;
use chrono::{DateTime, Utc};

/// How many recent insertion timestamps are kept for the persisted record.
pub(crate) const MAX_OLDEST_DATES: usize = 200;

/// Decides what happens to an entry's timestamp when its key is written again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AgeRefresh {
  /// The age keeps counting from the first insertion of the key.
  #[default]
  KeepFirst,
  /// Every write restarts the age of the entry.
  OnWrite,
}

/// The outcome of writing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
  Inserted,
  Updated,
}

/// The map of entries plus the first-insertion order used to pick eviction victims.
///
/// This type holds no lock. The owning cache guards it with its state mutex.
pub(crate) struct BoundedStore<K: Eq + Hash + Clone, V> {
  entries: HashMap<K, CacheEntry<V>>,
  order: InsertionOrder<K>,
  max_size: usize,
  flush_to_size: Option<usize>,
  oldest_dates: VecDeque<DateTime<Utc>>,
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for BoundedStore<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BoundedStore")
      .field("len", &self.entries.len())
      .field("max_size", &self.max_size)
      .field("flush_to_size", &self.flush_to_size)
      .finish()
  }
}

impl<K: Eq + Hash + Clone, V> BoundedStore<K, V> {
  pub(crate) fn new(max_size: usize, flush_to_size: Option<usize>) -> Self {
    let max_size = max_size.max(1);
    Self {
      entries: HashMap::default(),
      order: InsertionOrder::new(),
      max_size,
      flush_to_size: flush_to_size.map(|target| target.min(max_size)),
      oldest_dates: VecDeque::new(),
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn max_size(&self) -> usize {
    self.max_size
  }

  pub(crate) fn flush_to_size(&self) -> Option<usize> {
    self.flush_to_size
  }

  pub(crate) fn get(&self, key: &K) -> Option<&CacheEntry<V>> {
    self.entries.get(key)
  }

  pub(crate) fn contains_key(&self, key: &K) -> bool {
    self.entries.contains_key(key)
  }

  pub(crate) fn keys(&self) -> Vec<K> {
    self.entries.keys().cloned().collect()
  }

  pub(crate) fn values(&self) -> Vec<Arc<V>> {
    self.entries.values().map(CacheEntry::value).collect()
  }

  pub(crate) fn entries(&self) -> impl Iterator<Item = (&K, &CacheEntry<V>)> {
    self.entries.iter()
  }

  /// Keys from oldest to newest insertion.
  pub(crate) fn ordered_keys(&self) -> Vec<K> {
    self.order.to_vec()
  }

  pub(crate) fn oldest_dates(&self) -> impl Iterator<Item = &DateTime<Utc>> {
    self.oldest_dates.iter()
  }

  /// Writes `value` under `key`.
  ///
  /// A key that already exists keeps its place in the insertion order. Its
  /// timestamp is replaced only under [`AgeRefresh::OnWrite`].
  pub(crate) fn upsert(
    &mut self,
    key: K,
    value: Arc<V>,
    now: Option<DateTime<Utc>>,
    refresh: AgeRefresh,
  ) -> Upsert {
    if let Some(existing) = self.entries.get_mut(&key) {
      existing.value = value;
      if refresh == AgeRefresh::OnWrite {
        if let Some(old) = existing.inserted_at.take() {
          remove_first(&mut self.oldest_dates, &old);
        }
        existing.inserted_at = now;
        if let Some(at) = now {
          push_date(&mut self.oldest_dates, at);
        }
      }
      return Upsert::Updated;
    }

    if let Some(at) = now {
      push_date(&mut self.oldest_dates, at);
    }
    self.order.push_back(key.clone());
    self.entries.insert(key, CacheEntry::new(value, now));
    Upsert::Inserted
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
    let entry = self.entries.remove(key)?;
    self.order.remove(key);
    if let Some(at) = entry.inserted_at {
      remove_first(&mut self.oldest_dates, &at);
    }
    Some(entry)
  }

  /// Drops the oldest keys once the store holds more than `max_size` entries.
  ///
  /// With a `flush_to_size` target the store is cut down to that target in one
  /// batch, otherwise only the overflow goes. Returns the evicted keys, oldest first.
  pub(crate) fn evict_overflow(&mut self) -> Vec<K> {
    let count = self.order.len();
    if count <= self.max_size {
      return Vec::new();
    }

    // The newest entry always survives.
    let target = self.flush_to_size.unwrap_or(self.max_size).max(1);
    let overhead = count.saturating_sub(target);
    if overhead == 0 {
      return Vec::new();
    }

    let victims = self.order.pop_front_n(overhead);
    for key in &victims {
      if let Some(entry) = self.entries.remove(key) {
        if let Some(at) = entry.inserted_at {
          remove_first(&mut self.oldest_dates, &at);
        }
      }
    }
    victims
  }

  /// Sets the size bound and evicts down to it.
  ///
  /// A shrinking bound also pulls `flush_to_size` below the new maximum.
  pub(crate) fn set_max_size(&mut self, max_size: usize) -> Vec<K> {
    let max_size = max_size.max(1);
    if max_size == self.max_size {
      return Vec::new();
    }
    self.max_size = max_size;
    if let Some(target) = self.flush_to_size {
      self.flush_to_size = Some(target.min(max_size - 1));
    }
    self.evict_overflow()
  }

  pub(crate) fn set_flush_to_size(&mut self, flush_to_size: Option<usize>) -> Vec<K> {
    self.flush_to_size = flush_to_size.map(|target| target.min(self.max_size));
    self.evict_overflow()
  }

  pub(crate) fn clear(&mut self) {
    self.entries.clear();
    self.order.clear();
    self.oldest_dates.clear();
  }

  /// Removes every entry whose key is not in `keep`. Returns the removed count.
  pub(crate) fn retain_keys<S: BuildHasher>(&mut self, keep: &std::collections::HashSet<K, S>) -> usize {
    let doomed: Vec<K> = self
      .order
      .iter()
      .filter(|key| !keep.contains(*key))
      .cloned()
      .collect();
    for key in &doomed {
      self.remove(key);
    }
    // Entries that somehow escaped the order list still have to go.
    let strays: Vec<K> = self
      .entries
      .keys()
      .filter(|key| !keep.contains(*key))
      .cloned()
      .collect();
    for key in &strays {
      self.remove(key);
    }
    doomed.len() + strays.len()
  }

  /// Removes entries inserted strictly before `cutoff`; untimed entries go too.
  pub(crate) fn remove_inserted_before(&mut self, cutoff: DateTime<Utc>) -> Vec<K> {
    let expired: Vec<K> = self
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_older_than(cutoff))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      self.remove(key);
    }
    expired
  }

  /// Replaces the whole content from a persisted record.
  ///
  /// The saved order is trusted for keys that have an entry. Entries missing
  /// from it are appended and duplicates dropped, so both collections agree
  /// afterwards. Returns the number of repairs made.
  pub(crate) fn restore(
    &mut self,
    entries: impl IntoIterator<Item = (K, CacheEntry<V>)>,
    order: impl IntoIterator<Item = K>,
    oldest_dates: impl IntoIterator<Item = DateTime<Utc>>,
  ) -> usize {
    self.clear();
    self.entries.extend(entries);

    let mut repairs = 0;
    for key in order {
      if !self.entries.contains_key(&key) || !self.order.push_back(key) {
        repairs += 1;
      }
    }
    let missing: Vec<K> = self
      .entries
      .keys()
      .filter(|key| !self.order.contains(key))
      .cloned()
      .collect();
    repairs += missing.len();
    for key in missing {
      self.order.push_back(key);
    }

    for at in oldest_dates {
      push_date(&mut self.oldest_dates, at);
    }
    repairs
  }

  /// Describes every disagreement between the entry map and the order list.
  pub(crate) fn inconsistencies(&self) -> Vec<String> {
    let mut issues = Vec::new();
    let orphaned = self
      .order
      .iter()
      .filter(|key| !self.entries.contains_key(*key))
      .count();
    if orphaned > 0 {
      issues.push(format!("{orphaned} ordered keys have no entry"));
    }
    let unordered = self
      .entries
      .keys()
      .filter(|key| !self.order.contains(key))
      .count();
    if unordered > 0 {
      issues.push(format!("{unordered} entries are missing from the insertion order"));
    }
    if self.entries.len() != self.order.len() {
      issues.push(format!(
        "entry count {} differs from order count {}",
        self.entries.len(),
        self.order.len()
      ));
    }
    issues
  }
}

fn push_date(dates: &mut VecDeque<DateTime<Utc>>, at: DateTime<Utc>) {
  dates.push_back(at);
  while dates.len() > MAX_OLDEST_DATES {
    dates.pop_front();
  }
}

fn remove_first(dates: &mut VecDeque<DateTime<Utc>>, at: &DateTime<Utc>) {
  if let Some(pos) = dates.iter().position(|d| d == at) {
    dates.remove(pos);
  }
}
