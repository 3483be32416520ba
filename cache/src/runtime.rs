/// A unit of generation work handed to a [`TaskSpawner`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A trait for handing generator work to a caller-supplied queue.
///
/// Used by `GenerationMode::Queued`. The task may block for as long as the
/// generator runs, so implementations should run it on a pool that tolerates
/// blocking work.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Runs `task` at some point on some thread.
  fn spawn(&self, task: Task);
}

impl<F> TaskSpawner for F
where
  F: Fn(Task) + Send + Sync + 'static,
{
  fn spawn(&self, task: Task) {
    self(task)
  }
}

/// Runs tasks on Tokio's blocking thread pool.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner for an explicit runtime handle.
  pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, task: Task) {
    // The join handle is not needed; completion is observed through the entry.
    drop(self.0.spawn_blocking(task));
  }
}

/// Runs tasks on the global Rayon thread pool.
#[cfg(feature = "rayon")]
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonSpawner;

#[cfg(feature = "rayon")]
impl TaskSpawner for RayonSpawner {
  fn spawn(&self, task: Task) {
    rayon::spawn(task);
  }
}
