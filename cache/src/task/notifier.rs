use crate::listener::{CacheEvent, ListenerRegistry};
use crate::metrics::Metrics;

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use fibre::mpsc;

/// A message sent to the notifier thread.
pub(crate) type Notification<K, V> = CacheEvent<K, V>;

/// The background thread that calls listeners when delivery is
/// [`Delivery::Background`](crate::Delivery::Background).
///
/// Events arrive over a single channel in the order the cache committed them,
/// so per-cache FIFO order is kept. Events raised by a listener running on
/// this thread are not queued; see [`Notifier::is_current_thread`].
pub(crate) struct Notifier<K: Send, V: Send + Sync> {
  _handle: JoinHandle<()>,
  thread_id: ThreadId,
  sender: mpsc::BoundedSender<Notification<K, V>>,
}

impl<K: Send, V: Send + Sync> Notifier<K, V> {
  /// Spawns a new notifier thread.
  pub(crate) fn spawn(
    cache_name: Arc<str>,
    listeners: Arc<ListenerRegistry<K, V>>,
    metrics: Arc<Metrics>,
  ) -> Self
  where
    K: 'static,
    V: 'static,
  {
    const NOTIFICATION_CHANNEL_CAPACITY: usize = 128;
    let (tx, rx): (
      mpsc::BoundedSender<Notification<K, V>>,
      mpsc::BoundedReceiver<Notification<K, V>>,
    ) = mpsc::bounded(NOTIFICATION_CHANNEL_CAPACITY);

    let handle = thread::spawn(move || {
      // Ends once the sender held by the cache is dropped.
      while let Ok(event) = rx.recv() {
        let delivered = listeners.dispatch(&cache_name, &event);
        Metrics::add(&metrics.notifications, delivered);
      }
    });

    Self {
      thread_id: handle.thread().id(),
      _handle: handle,
      sender: tx,
    }
  }

  /// True when called from a listener running on the notifier thread. Such a
  /// caller must not queue: the thread is the channel's only consumer, so a
  /// full channel would never drain.
  pub(crate) fn is_current_thread(&self) -> bool {
    thread::current().id() == self.thread_id
  }

  /// Queues an event. Blocks while the channel is full.
  pub(crate) fn send(&self, event: Notification<K, V>) -> bool {
    self.sender.send(event).is_ok()
  }
}
