mod config;

pub use config::SectionConfig;

use crate::error::BuildError;
use crate::metrics::Metrics;
use crate::registry::CacheRegistry;
use crate::section::{CacheSection, SectionKey};
use crate::shared::{KeyPathFn, SectionShared};
use crate::store::ShardedStore;
use crate::task::notifier::Notifier;
use crate::value::CachedValue;
use crate::TaskSpawner;

use core::fmt;
use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// The idle timeout used by the `*_default` convenience methods unless
/// configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A builder for creating `CacheSection` instances.
pub struct SectionBuilder<K, V, H = ahash::RandomState> {
  pub(crate) name: String,
  pub(crate) shards: usize,
  pub(crate) default_timeout: Duration,
  pub(crate) validate_keys: bool,
  pub(crate) hasher: H,
  spawner: Option<Arc<dyn TaskSpawner>>,
  registry: Option<CacheRegistry>,
  key_path: Option<KeyPathFn<K>>,
  _key_marker: PhantomData<K>,
  _value_marker: PhantomData<V>,
}

// Manual Debug implementation for SectionBuilder.
impl<K, V, H> fmt::Debug for SectionBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SectionBuilder")
      .field("name", &self.name)
      .field("shards", &self.shards)
      .field("default_timeout", &self.default_timeout)
      .field("validate_keys", &self.validate_keys)
      .field("has_spawner", &self.spawner.is_some())
      .field("has_registry", &self.registry.is_some())
      .field("has_key_path", &self.key_path.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
// This impl block has no restrictive bounds on K or V.
impl<K, V, H> SectionBuilder<K, V, H> {
  /// Sets the section's name, used in logs, thread names and the registry.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the number of shards per key namespace.
  ///
  /// Rounded up to a power of two by `build`, which rejects zero and counts
  /// too large to round.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Sets the idle timeout used by the `*_default` convenience methods.
  pub fn default_timeout(mut self, timeout: Duration) -> Self {
    self.default_timeout = timeout;
    self
  }

  /// Enables or disables the key contract check on every key passed to the
  /// section, whether it inserts, looks up or removes.
  ///
  /// Enabled by default in debug builds. When enabled, a key that does not
  /// equal itself or does not hash stably causes a panic.
  pub fn validate_keys(mut self, enabled: bool) -> Self {
    self.validate_keys = enabled;
    self
  }

  /// Sets the spawner used by `GenerationMode::Queued`.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Registers the built section with `registry`.
  pub fn registry(mut self, registry: &CacheRegistry) -> Self {
    self.registry = Some(registry.clone());
    self
  }

  /// Sets the function that exposes a key as a path, enabling
  /// [`CacheRegistry::invalidate_by_prefix`]. Keys for which it returns `None`
  /// are never matched. Dual keys are matched on their first component.
  pub fn key_path(mut self, key_path: fn(&K) -> Option<&str>) -> Self {
    self.key_path = Some(key_path);
    self
  }

  /// Checks the settings and returns the shard count rounded to a power of two.
  fn validate(&self) -> Result<usize, BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    let shards = self
      .shards
      .checked_next_power_of_two()
      .ok_or(BuildError::TooManyShards { requested: self.shards })?;
    if self.name.trim().is_empty() {
      return Err(BuildError::EmptyName);
    }
    Ok(shards)
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> SectionBuilder<K, V, H> {
  /// Creates a new `SectionBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      name: "default".to_string(),
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      default_timeout: DEFAULT_TIMEOUT,
      validate_keys: cfg!(debug_assertions),
      hasher: H::default(),
      spawner: None,
      registry: None,
      key_path: None,
      _key_marker: PhantomData,
      _value_marker: PhantomData,
    }
  }
}

impl<K, V> Default for SectionBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> SectionBuilder<K, V, H>
where
  K: SectionKey,
  V: CachedValue,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the section.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Builds the `CacheSection`.
  pub fn build(self) -> Result<CacheSection<K, V, H>, BuildError> {
    let shards = self.validate()?;

    let name: Arc<str> = Arc::from(self.name.as_str());
    let shared = Arc::new(SectionShared {
      name: name.clone(),
      single: ShardedStore::new(shards, self.hasher.clone()),
      dual: ShardedStore::new(shards, self.hasher),
      metrics: Arc::new(Metrics::new()),
      notifier: Arc::new(Notifier::new(name)),
      spawner: self.spawner,
      key_path: self.key_path,
      validate_keys: self.validate_keys,
      default_timeout: self.default_timeout,
      active_generations: Arc::new(CachePadded::new(AtomicUsize::new(0))),
    });

    let section = CacheSection { shared };
    if let Some(registry) = &self.registry {
      registry.register(&section);
    }
    tracing::debug!(section = %section.name(), shards, "section built");
    Ok(section)
  }
}
