use thiserror::Error;

/// A boxed, thread-safe error produced by a generator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when building a section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The section was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  #[error("shard count {requested} cannot be rounded up to a power of two")]
  TooManyShards { requested: usize },
  /// Sections are registered and logged by name, so it must not be empty.
  #[error("section name cannot be empty")]
  EmptyName,
}

/// Errors returned by section operations.
#[derive(Debug, Error)]
pub enum SectionError {
  /// `GenerationMode::Queued` was requested but the section has no
  /// `TaskSpawner` configured.
  #[error("section '{section}' has no task spawner for queued generation")]
  SpawnerRequired { section: String },

  /// The generator failed while the calling thread was the one that triggered
  /// generation. The entry is already resolved to "no value" when this is
  /// returned, so other waiters are not left blocked.
  #[error("generator for key {key} in section '{section}' failed: {source}")]
  Generator {
    section: String,
    key: String,
    #[source]
    source: BoxError,
  },
}

/// A specialized `Result` type for section operations.
pub type Result<T, E = SectionError> = std::result::Result<T, E>;

/// The outcome of a generator run.
///
/// Generators report what happened through this type instead of panicking, so
/// the section can decide which outcomes are memoized and which are surfaced.
#[derive(Debug)]
pub enum ComputeResult<R> {
  /// A value was produced and is published to every waiter.
  Ok(R),
  /// Nothing was produced. The absence is memoized until the entry expires.
  Absent,
  /// The backing resource does not exist. Logged at warning level and
  /// memoized like [`ComputeResult::Absent`].
  NotFound(String),
  /// The process is tearing down. Swallowed silently; the entry resolves to
  /// "no value".
  ShuttingDown,
  /// A real fault. The entry resolves to "no value" and the error is handed
  /// back to the thread that triggered the generation.
  Fail(BoxError),
}

impl<R> ComputeResult<R> {
  /// Wraps an arbitrary error as a [`ComputeResult::Fail`].
  pub fn fail<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    ComputeResult::Fail(error.into())
  }

  /// Returns `true` if the generator produced a value.
  pub fn is_ok(&self) -> bool {
    matches!(self, ComputeResult::Ok(_))
  }
}

impl<R> From<Option<R>> for ComputeResult<R> {
  fn from(value: Option<R>) -> Self {
    match value {
      Some(value) => ComputeResult::Ok(value),
      None => ComputeResult::Absent,
    }
  }
}

impl<R, E> From<std::result::Result<R, E>> for ComputeResult<R>
where
  E: Into<BoxError>,
{
  fn from(result: std::result::Result<R, E>) -> Self {
    match result {
      Ok(value) => ComputeResult::Ok(value),
      Err(error) => ComputeResult::Fail(error.into()),
    }
  }
}
