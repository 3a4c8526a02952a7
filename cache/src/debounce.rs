//! A keyed, trailing-edge debounce filter.
//!
//! Every call to [`Debouncer::debounce`] replaces whatever was pending for the
//! same key and pushes its deadline to `now + threshold`. When a key's deadline
//! passes without another event, its latest action runs exactly once on the
//! debouncer's worker thread. Actions run one at a time, so two executions for
//! the same key never overlap.
//!
//! Caches share the process-wide instance returned by [`global`] unless another
//! one is injected through the builder.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
  deadline: Instant,
  action: Action,
}

struct Inner {
  pending: Mutex<HashMap<String, Pending>>,
  wakeup: Condvar,
  shutdown: AtomicBool,
  executions: AtomicU64,
}

/// Coalesces bursts of events per key into a single delayed action.
pub struct Debouncer {
  inner: Arc<Inner>,
  _worker: Option<JoinHandle<()>>,
}

static GLOBAL_DEBOUNCER: Lazy<Arc<Debouncer>> = Lazy::new(|| Arc::new(Debouncer::new()));

/// The process-wide debouncer shared by all caches by default.
pub fn global() -> Arc<Debouncer> {
  Arc::clone(&GLOBAL_DEBOUNCER)
}

impl fmt::Debug for Debouncer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Debouncer")
      .field("pending", &self.pending_count())
      .field("executions", &self.executions())
      .finish()
  }
}

impl Default for Debouncer {
  fn default() -> Self {
    Self::new()
  }
}

impl Debouncer {
  /// Creates a debouncer with its own worker thread.
  pub fn new() -> Self {
    let inner = Arc::new(Inner {
      pending: Mutex::new(HashMap::new()),
      wakeup: Condvar::new(),
      shutdown: AtomicBool::new(false),
      executions: AtomicU64::new(0),
    });

    let worker_inner = Arc::clone(&inner);
    let worker = thread::Builder::new()
      .name("fibre-stash-debounce".into())
      .spawn(move || run_worker(&worker_inner));
    let worker = match worker {
      Ok(handle) => Some(handle),
      Err(err) => {
        tracing::error!(error = %err, "failed to spawn debounce worker; debounced actions will not run");
        None
      }
    };

    Self {
      inner,
      _worker: worker,
    }
  }

  /// Schedules `action` to run once `threshold` has passed without another
  /// event for `key`. A pending action for the same key is replaced.
  pub fn debounce<F>(&self, key: impl Into<String>, threshold: Duration, action: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let pending = Pending {
      deadline: Instant::now() + threshold,
      action: Box::new(action),
    };
    self.inner.pending.lock().insert(key.into(), pending);
    self.inner.wakeup.notify_one();
  }

  /// Drops the pending action for `key`, if any.
  pub fn cancel(&self, key: &str) -> bool {
    self.inner.pending.lock().remove(key).is_some()
  }

  pub fn is_pending(&self, key: &str) -> bool {
    self.inner.pending.lock().contains_key(key)
  }

  pub fn pending_count(&self) -> usize {
    self.inner.pending.lock().len()
  }

  /// Total number of actions this debouncer has run.
  pub fn executions(&self) -> u64 {
    self.inner.executions.load(Ordering::Relaxed)
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    // Not joined: the last handle may be dropped from inside an action.
    self.inner.shutdown.store(true, Ordering::Release);
    self.inner.pending.lock().clear();
    self.inner.wakeup.notify_all();
  }
}

fn run_worker(inner: &Inner) {
  let mut pending = inner.pending.lock();
  loop {
    if inner.shutdown.load(Ordering::Acquire) {
      return;
    }

    let now = Instant::now();
    let due: Vec<String> = pending
      .iter()
      .filter(|(_, p)| p.deadline <= now)
      .map(|(key, _)| key.clone())
      .collect();

    if !due.is_empty() {
      let actions: Vec<(String, Action)> = due
        .into_iter()
        .filter_map(|key| pending.remove(&key).map(|p| (key, p.action)))
        .collect();
      MutexGuard::unlocked(&mut pending, || run_actions(inner, actions));
      continue;
    }

    match pending.values().map(|p| p.deadline).min() {
      Some(deadline) => {
        inner.wakeup.wait_until(&mut pending, deadline);
      }
      None => inner.wakeup.wait(&mut pending),
    }
  }
}

fn run_actions(inner: &Inner, actions: Vec<(String, Action)>) {
  for (key, action) in actions {
    if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
      tracing::error!(key = %key, "debounced action panicked");
    }
    inner.executions.fetch_add(1, Ordering::Relaxed);
  }
}
