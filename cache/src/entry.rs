use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A stored value together with its insertion timestamp.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc so reads never clone `V`.
  pub(crate) value: Arc<V>,
  /// Set only when the cache tracks ages.
  pub(crate) inserted_at: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, inserted_at: Option<DateTime<Utc>>) -> Self {
    Self { value, inserted_at }
  }

  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  /// Entries without a timestamp count as older than any cutoff.
  #[inline]
  pub(crate) fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
    match self.inserted_at {
      Some(at) => at < cutoff,
      None => true,
    }
  }
}
