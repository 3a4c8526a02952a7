//! The process-wide registry of live caches and the memory-pressure broadcast.
//!
//! Every cache registers itself on construction and is deregistered when its
//! last handle is dropped. [`broadcast`] asks each live cache to drop its
//! in-memory content. It is advisory: nothing guarantees the pressure that
//! triggered it goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Something that can shed memory when asked to.
pub(crate) trait MemoryPressureResponder: Send + Sync {
  fn responder_name(&self) -> &str;

  fn on_memory_pressure(&self);
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

static REGISTRY: Lazy<Mutex<HashMap<u64, Weak<dyn MemoryPressureResponder>>>> =
  Lazy::new(|| Mutex::new(HashMap::new()));

/// Removes its responder from the registry when dropped.
#[derive(Debug)]
pub(crate) struct Registration {
  id: u64,
}

impl Drop for Registration {
  fn drop(&mut self) {
    REGISTRY.lock().remove(&self.id);
  }
}

pub(crate) fn register(responder: Weak<dyn MemoryPressureResponder>) -> Registration {
  let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
  REGISTRY.lock().insert(id, responder);
  Registration { id }
}

/// Asks every live cache in the process to drop its in-memory content.
///
/// Caches built with persistence save their keys first. Returns the number of
/// caches that were notified.
pub fn broadcast() -> usize {
  let live: Vec<Arc<dyn MemoryPressureResponder>> = {
    let registry = REGISTRY.lock();
    registry.values().filter_map(Weak::upgrade).collect()
  };

  tracing::info!(caches = live.len(), "broadcasting memory pressure");
  for responder in &live {
    tracing::debug!(cache = responder.responder_name(), "clearing for memory pressure");
    responder.on_memory_pressure();
  }
  live.len()
}

/// The number of caches currently alive in this process.
pub fn live_caches() -> usize {
  REGISTRY
    .lock()
    .values()
    .filter(|weak| weak.strong_count() > 0)
    .count()
}
