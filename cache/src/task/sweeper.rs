use crate::registry::CacheRegistry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A background thread that sweeps every section of a registry on a fixed
/// interval.
///
/// The thread exits when the sweeper is stopped or dropped. It only holds the
/// registry, so sections can still be dropped while it runs.
#[derive(Debug)]
pub struct Sweeper {
  handle: Option<JoinHandle<()>>,
  stop_flag: Arc<AtomicBool>,
}

impl Sweeper {
  pub(crate) fn spawn(registry: CacheRegistry, interval: Duration) -> Self {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = stop_flag.clone();

    let spawned = thread::Builder::new()
      .name("section-sweeper".to_string())
      .spawn(move || {
        while !stop_clone.load(Ordering::Acquire) {
          let tick_start = Instant::now();
          registry.sweep_all();

          // Park for the rest of the tick. `stop` unparks us early.
          while !stop_clone.load(Ordering::Acquire) {
            match interval.checked_sub(tick_start.elapsed()) {
              Some(remaining) if !remaining.is_zero() => thread::park_timeout(remaining),
              _ => break,
            }
          }
        }
        tracing::trace!("sweeper thread exiting");
      });

    let handle = match spawned {
      Ok(handle) => Some(handle),
      Err(error) => {
        tracing::error!(%error, "failed to spawn sweeper thread");
        None
      }
    };
    Self { handle, stop_flag }
  }

  /// Returns `true` while the background thread is alive.
  pub fn is_running(&self) -> bool {
    self
      .handle
      .as_ref()
      .is_some_and(|handle| !handle.is_finished())
  }

  /// Stops the background thread and waits for it to exit. A sweep already in
  /// progress is allowed to finish.
  pub fn stop(mut self) {
    self.signal_stop();
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }

  fn signal_stop(&self) {
    self.stop_flag.store(true, Ordering::Release);
    if let Some(handle) = &self.handle {
      handle.thread().unpark();
    }
  }
}

impl Drop for Sweeper {
  fn drop(&mut self) {
    // Not joined here; the thread notices the flag on its next wakeup.
    self.signal_stop();
  }
}
