//! A serializable description of a cache's settings.
//!
//! Durations are written in `humantime` form, e.g. `"30days"` or `"300ms"`.
//!
//! ```
//! use fibre_stash::{CacheBuilder, CacheConfig};
//!
//! let config: CacheConfig = serde_json::from_str(r#"{ "max_size": 100, "max_age": "1h" }"#).unwrap();
//! let cache = CacheBuilder::<String, u32>::from_config("sessions", &config).build();
//! assert_eq!(cache.max_size(), 100);
//! ```

use crate::builder::{DEFAULT_MAX_AGE, DEFAULT_MAX_SIZE};
use crate::listener::Delivery;
use crate::store::AgeRefresh;
use crate::CacheBuilder;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  pub max_size: usize,
  pub flush_to_size: Option<usize>,
  pub tracks_ages: bool,
  /// `None` disables expiration by age.
  #[serde(with = "humantime_opt")]
  pub max_age: Option<Duration>,
  pub age_refresh: AgeRefresh,
  pub memory_only: bool,
  pub log: bool,
  pub storage_dir: Option<PathBuf>,
  #[serde(with = "humantime_opt")]
  pub auto_save: Option<Duration>,
  pub attempt_load: bool,
  pub delivery: Delivery,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_size: DEFAULT_MAX_SIZE,
      flush_to_size: None,
      tracks_ages: false,
      max_age: Some(DEFAULT_MAX_AGE),
      age_refresh: AgeRefresh::default(),
      memory_only: false,
      log: false,
      storage_dir: None,
      auto_save: None,
      attempt_load: false,
      delivery: Delivery::default(),
    }
  }
}

impl<K, V> CacheBuilder<K, V> {
  /// Starts a builder with every setting taken from `config`.
  pub fn from_config(name: impl Into<String>, config: &CacheConfig) -> Self {
    let mut builder = CacheBuilder::new(name)
      .max_size(config.max_size)
      .tracks_ages(config.tracks_ages)
      .age_refresh(config.age_refresh)
      .memory_only(config.memory_only)
      .log(config.log)
      .attempt_load(config.attempt_load)
      .delivery(config.delivery);
    builder.flush_to_size = config.flush_to_size;
    builder.max_age = config.max_age;
    builder.auto_save = config.auto_save;
    builder.storage_dir = config.storage_dir.clone();
    builder
  }
}

mod humantime_opt {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub(super) fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
      Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
      None => serializer.serialize_none(),
    }
  }

  pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw
      .map(|text| humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom))
      .transpose()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_object_gives_defaults() {
    let config: CacheConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, CacheConfig::default());
  }

  #[test]
  fn durations_use_humantime() {
    let config: CacheConfig =
      serde_json::from_str(r#"{ "max_age": "2h 30m", "auto_save": "300ms" }"#).unwrap();
    assert_eq!(config.max_age, Some(Duration::from_secs(9000)));
    assert_eq!(config.auto_save, Some(Duration::from_millis(300)));

    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["auto_save"], "300ms");
  }

  #[test]
  fn null_max_age_disables_expiration() {
    let config: CacheConfig = serde_json::from_str(r#"{ "max_age": null }"#).unwrap();
    assert_eq!(config.max_age, None);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    assert!(serde_json::from_str::<CacheConfig>(r#"{ "capacity": 3 }"#).is_err());
  }
}
