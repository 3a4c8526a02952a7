use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A source of wall-clock timestamps for entry ages and save times.
///
/// Caches use [`SystemClock`] unless another clock is injected through the
/// builder. Tests typically inject a [`ManualClock`].
pub trait Clock: Send + Sync + fmt::Debug {
  fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  /// Moves the clock forward by `by`.
  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock();
    *now = add_duration(*now, by);
  }

  pub fn set(&self, to: DateTime<Utc>) {
    *self.now.lock() = to;
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

/// `at - age`, saturating at the earliest representable timestamp.
pub(crate) fn sub_duration(at: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(age)
    .ok()
    .and_then(|delta| at.checked_sub_signed(delta))
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + by`, saturating at the latest representable timestamp.
pub(crate) fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(by)
    .ok()
    .and_then(|delta| at.checked_add_signed(delta))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn manual_clock_advances_only_on_request() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);

    clock.advance(Duration::from_secs(90));
    assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap());
  }

  #[test]
  fn sub_duration_saturates() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
      sub_duration(start, Duration::from_secs(60)),
      Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 0).unwrap()
    );
    assert_eq!(sub_duration(start, Duration::MAX), DateTime::<Utc>::MIN_UTC);
  }
}
