#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fibre_section::{CacheSection, CachedValue};

/// A payload that counts how often it was destroyed.
#[derive(Debug)]
pub struct Tracked {
  pub value: u32,
  destroyed: Arc<AtomicUsize>,
}

impl Tracked {
  pub fn new(value: u32, destroyed: &Arc<AtomicUsize>) -> Self {
    Self {
      value,
      destroyed: destroyed.clone(),
    }
  }
}

impl CachedValue for Tracked {
  fn destroy(&self) {
    self.destroyed.fetch_add(1, Ordering::SeqCst);
  }
}

/// Image metadata, as produced by the thumbnail generator in the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
  pub width: u32,
  pub height: u32,
}

impl CachedValue for Dimensions {}

/// Installs a test-friendly subscriber once. Set `RUST_LOG=fibre_section=debug`
/// to see the section's events.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub fn build_section<V: CachedValue>(name: &str) -> CacheSection<String, V> {
  init_tracing();
  CacheSection::builder()
    .name(name)
    .shards(4)
    .validate_keys(true)
    .build()
    .unwrap()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  condition()
}
