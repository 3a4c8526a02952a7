use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A change that happened to a cache's content.
#[derive(Debug, Clone)]
pub enum CacheEvent<K, V> {
  /// A key was inserted or overwritten.
  ItemUpdated { key: K, value: Arc<V> },
  /// The whole cache was cleared.
  Cleared,
  /// One or more keys were removed, either explicitly or by eviction.
  ItemsRemoved(Vec<K>),
}

/// A listener that can be registered with a cache to observe its changes.
///
/// The cache only keeps a weak reference to a registered listener. Once the
/// last `Arc` held by the caller is dropped, the listener is skipped and
/// pruned. Callbacks run after the mutation that caused them has committed, so
/// a listener may read from or write to the cache it observes.
pub trait CacheListener<K, V>: Send + Sync {
  fn on_item_updated(&self, _cache_name: &str, _key: &K, _value: &Arc<V>) {}

  fn on_cleared(&self, _cache_name: &str) {}

  fn on_items_removed(&self, _cache_name: &str, _keys: &[K]) {}
}

/// The token returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "listener#{}", self.0)
  }
}

/// Where listener callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Delivery {
  /// On the thread that performed the mutation, right after it commits.
  #[default]
  Inline,
  /// On a dedicated notifier thread owned by the cache.
  Background,
}

/// The weakly-held listener list of one cache.
pub(crate) struct ListenerRegistry<K, V> {
  next_id: AtomicU64,
  listeners: Mutex<Vec<(ListenerId, Weak<dyn CacheListener<K, V>>)>>,
}

impl<K, V> fmt::Debug for ListenerRegistry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerRegistry")
      .field("registered", &self.listeners.lock().len())
      .finish()
  }
}

impl<K, V> ListenerRegistry<K, V> {
  pub(crate) fn new() -> Self {
    Self {
      next_id: AtomicU64::new(1),
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub(crate) fn add<L>(&self, listener: &Arc<L>) -> ListenerId
  where
    L: CacheListener<K, V> + 'static,
  {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    let weak: Weak<dyn CacheListener<K, V>> = Arc::downgrade(listener) as Weak<dyn CacheListener<K, V>>;
    self.listeners.lock().push((id, weak));
    id
  }

  pub(crate) fn remove(&self, id: ListenerId) -> bool {
    let mut listeners = self.listeners.lock();
    let before = listeners.len();
    listeners.retain(|(existing, _)| *existing != id);
    listeners.len() != before
  }

  /// Counts listeners that are still alive.
  pub(crate) fn live_count(&self) -> usize {
    self
      .listeners
      .lock()
      .iter()
      .filter(|(_, weak)| weak.strong_count() > 0)
      .count()
  }

  /// Upgrades every live listener and prunes the dead ones.
  fn live(&self) -> Vec<Arc<dyn CacheListener<K, V>>> {
    let mut listeners = self.listeners.lock();
    let mut live = Vec::with_capacity(listeners.len());
    listeners.retain(|(_, weak)| match weak.upgrade() {
      Some(listener) => {
        live.push(listener);
        true
      }
      None => false,
    });
    live
  }

  /// Hands `event` to every live listener. Returns how many were called.
  ///
  /// The registry lock is released before any callback runs.
  pub(crate) fn dispatch(&self, cache_name: &str, event: &CacheEvent<K, V>) -> usize {
    let live = self.live();
    for listener in &live {
      match event {
        CacheEvent::ItemUpdated { key, value } => listener.on_item_updated(cache_name, key, value),
        CacheEvent::Cleared => listener.on_cleared(cache_name),
        CacheEvent::ItemsRemoved(keys) => listener.on_items_removed(cache_name, keys),
      }
    }
    live.len()
  }
}
