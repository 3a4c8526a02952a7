use fibre_stash::{CacheBuilder, CacheListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct PrintListener;

impl CacheListener<String, u32> for PrintListener {
  fn on_item_updated(&self, cache_name: &str, key: &String, value: &Arc<u32>) {
    println!("[{cache_name}] {key} = {value}");
  }

  fn on_items_removed(&self, cache_name: &str, keys: &[String]) {
    println!("[{cache_name}] evicted {keys:?}");
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let dir = std::env::temp_dir().join("fibre_stash_demo");
  let cache = CacheBuilder::<String, u32>::new("demo scores")
    .max_size(5)
    .flush_to_size(3)
    .tracks_ages(true)
    .max_age(Duration::from_secs(24 * 60 * 60))
    .storage_dir(&dir)
    .auto_save(Duration::from_millis(200))
    .attempt_load(true)
    .build_persistent();
  println!("loaded {} entries from {}", cache.len(), dir.display());

  let listener = Arc::new(PrintListener);
  cache.add_listener(&listener);

  for (i, player) in ["ada", "bob", "cy", "dee", "eve", "fay"].iter().enumerate() {
    cache.set(player.to_string(), (i as u32 + 1) * 100);
  }

  // Give the debounced auto-save a chance to run.
  thread::sleep(Duration::from_millis(500));
  println!("saved: {}, metrics: {:?}", !cache.is_dirty(), cache.metrics());
}
