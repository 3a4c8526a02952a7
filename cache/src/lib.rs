//! A bounded, thread-safe key-value cache with age-based expiration, JSON
//! persistence, change notification and debounced auto-save.
//!
//! # Features
//! - **Bounded size**: evicts oldest-first by *first* insertion, optionally in
//!   batches down to a `flush_to_size` target.
//! - **Age expiration**: entries can be timestamped and swept out once older
//!   than `max_age`, using an injectable [`Clock`].
//! - **Persistence**: the full state or just the keys as JSON files, written
//!   atomically. Requires the `serde` feature (on by default).
//! - **Auto-save**: bursts of mutations collapse into one save through a
//!   keyed [`debounce::Debouncer`].
//! - **Observers**: weakly-held [`CacheListener`]s, called in commit order.
//! - **Memory pressure**: [`pressure::broadcast`] clears every live cache.
//!
//! ```
//! use fibre_stash::CacheBuilder;
//!
//! let cache = CacheBuilder::<String, u32>::new("scores").max_size(3).build();
//! for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
//!   cache.set(name.to_string(), i as u32);
//! }
//! assert_eq!(cache.len(), 3);
//! assert!(cache.get(&"a".to_string()).is_none());
//! ```

// Public modules that form the API
pub mod builder;
pub mod debounce;
pub mod error;
pub mod handles;
pub mod listener;
pub mod metrics;
pub mod pressure;
pub mod time;

#[cfg(feature = "serde")]
pub mod config;
#[cfg(feature = "serde")]
pub mod persist;

// Internal, crate-only modules
mod entry;
mod order;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
#[cfg(feature = "serde")]
pub use config::CacheConfig;
pub use error::PersistError;
pub use handles::Cache;
pub use listener::{CacheEvent, CacheListener, Delivery, ListenerId};
pub use metrics::MetricsSnapshot;
pub use store::AgeRefresh;
pub use time::{Clock, ManualClock, SystemClock};
