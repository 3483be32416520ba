use crate::builder::SectionBuilder;
use crate::entry::EntryView;
use crate::error::{ComputeResult, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::shared::SectionShared;
use crate::value::CachedValue;

use core::fmt;
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

/// The bounds every section key must satisfy.
///
/// Keys are compared and hashed on every lookup, cloned into the map on
/// insertion, and printed in logs. `Eq` must be reflexive and `Hash` must be
/// stable; sections built with key validation panic on keys that are not.
pub trait SectionKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> SectionKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Where the generator of a newly claimed entry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationMode {
  /// On the calling thread. Concurrent callers for the same key block until
  /// the value is published.
  Blocking,
  /// On a freshly spawned, named OS thread. The caller does not block.
  Background,
  /// On the section's [`TaskSpawner`](crate::TaskSpawner). The caller does not
  /// block. Fails with [`SectionError::SpawnerRequired`](crate::SectionError)
  /// if the section was built without a spawner.
  Queued,
}

/// The key of an entry, as seen by [`CacheSection::remove_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKey<'a, K> {
  /// An entry of the single-key namespace.
  Single(&'a K),
  /// An entry of the dual-key namespace.
  Dual(&'a K, &'a K),
}

impl<'a, K> EntryKey<'a, K> {
  /// The single key, or the first component of a dual key.
  pub fn primary(&self) -> &'a K {
    match *self {
      EntryKey::Single(key) => key,
      EntryKey::Dual(key0, _) => key0,
    }
  }
}

/// A named, concurrent compute cache.
///
/// Each key maps to at most one entry. The first caller to ask for a missing
/// key runs its generator; every concurrent caller for the same key shares
/// that single result instead of generating again. Entries expire after a
/// per-call idle timeout and are evicted by [`sweep`](Self::sweep).
///
/// A section holds two independent key namespaces: single keys `K` and dual
/// keys `(K, K)`. The same `K` in both never collides.
///
/// `CacheSection` is a cheap handle; clones share the same entries. Dropping
/// the last handle destroys every remaining payload.
pub struct CacheSection<K, V: CachedValue, H = ahash::RandomState> {
  pub(crate) shared: Arc<SectionShared<K, V, H>>,
}

impl<K, V: CachedValue, H> Clone for CacheSection<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V: CachedValue, H> fmt::Debug for CacheSection<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheSection")
      .field("name", &self.shared.name)
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheSection<K, V>
where
  K: SectionKey,
  V: CachedValue,
{
  /// Returns a builder for a section with the default hasher.
  pub fn builder() -> SectionBuilder<K, V> {
    SectionBuilder::new()
  }
}

impl<K, V, H> CacheSection<K, V, H>
where
  K: SectionKey,
  V: CachedValue,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the payload for `key`, running `generator` if no entry exists.
  ///
  /// Every call refreshes the entry's idle deadline to at least `timeout`
  /// from now. In [`GenerationMode::Blocking`] the call waits for the value,
  /// whichever thread produces it. In the other modes it returns whatever is
  /// available right now, which is `None` while the generator is running;
  /// use [`get_or_generate_async`](Self::get_or_generate_async) to be told
  /// when the value lands.
  ///
  /// A generator failure is returned as [`SectionError::Generator`] to the
  /// blocking caller that ran it. The entry still resolves to "no value", so
  /// nobody else waits forever.
  ///
  /// [`SectionError::Generator`]: crate::SectionError::Generator
  pub fn get_or_generate<G>(&self, key: K, timeout: Duration, mode: GenerationMode, generator: G) -> Result<Option<Arc<V>>>
  where
    G: FnOnce(&K) -> ComputeResult<V> + Send + 'static,
  {
    self
      .shared
      .get_or_generate_in(&self.shared.single, key, timeout, mode, generator, || {})
  }

  /// [`get_or_generate`](Self::get_or_generate) in blocking mode with the
  /// section's default timeout.
  pub fn get_or_generate_default<G>(&self, key: K, generator: G) -> Result<Option<Arc<V>>>
  where
    G: FnOnce(&K) -> ComputeResult<V> + Send + 'static,
  {
    self.get_or_generate(key, self.shared.default_timeout, GenerationMode::Blocking, generator)
  }

  /// Like [`get_or_generate`](Self::get_or_generate), over the dual-key namespace.
  pub fn get_or_generate_dual<G>(
    &self,
    key0: K,
    key1: K,
    timeout: Duration,
    mode: GenerationMode,
    generator: G,
  ) -> Result<Option<Arc<V>>>
  where
    G: FnOnce(&K, &K) -> ComputeResult<V> + Send + 'static,
  {
    let generator = move |(key0, key1): &(K, K)| generator(key0, key1);
    self
      .shared
      .get_or_generate_in(&self.shared.dual, (key0, key1), timeout, mode, generator, || {})
  }

  /// Looks up `key`, generating it if needed, and hands the payload to
  /// `callback` once the entry resolves.
  ///
  /// If the entry is already resolved, or the caller is the thread currently
  /// generating it, `callback` runs on the calling thread before this returns.
  /// Otherwise it runs on the section's notifier thread. A callback whose
  /// entry is destroyed before it resolves receives `None`.
  ///
  /// A section has a single notifier thread, named `section-notify-<name>`,
  /// and runs deferred callbacks on it one at a time in delivery order. A slow
  /// callback delays every other pending callback of the section, so long
  /// work should be handed off to another thread or runtime.
  pub fn get_or_generate_async<G, C>(
    &self,
    key: K,
    timeout: Duration,
    mode: GenerationMode,
    generator: G,
    callback: C,
  ) -> Result<()>
  where
    G: FnOnce(&K) -> ComputeResult<V> + Send + 'static,
    C: FnOnce(Option<Arc<V>>) + Send + 'static,
  {
    self.shared.get_or_generate_async_in(
      &self.shared.single,
      key,
      timeout,
      mode,
      generator,
      Box::new(callback),
    )
  }

  /// Like [`get_or_generate_async`](Self::get_or_generate_async), over the
  /// dual-key namespace. Deferred callbacks share the same notifier thread.
  pub fn get_or_generate_dual_async<G, C>(
    &self,
    key0: K,
    key1: K,
    timeout: Duration,
    mode: GenerationMode,
    generator: G,
    callback: C,
  ) -> Result<()>
  where
    G: FnOnce(&K, &K) -> ComputeResult<V> + Send + 'static,
    C: FnOnce(Option<Arc<V>>) + Send + 'static,
  {
    let generator = move |(key0, key1): &(K, K)| generator(key0, key1);
    self.shared.get_or_generate_async_in(
      &self.shared.dual,
      (key0, key1),
      timeout,
      mode,
      generator,
      Box::new(callback),
    )
  }

  /// Looks up `key`, starting a background generation only if fewer than
  /// `limit` generations started through this method are still running.
  ///
  /// Over the limit, the call degrades to
  /// [`get_without_generating`](Self::get_without_generating). Never blocks
  /// and never surfaces generator errors; those are logged on the generating
  /// thread.
  pub fn get_or_generate_limited<G>(&self, key: K, timeout: Duration, limit: usize, generator: G) -> Option<Arc<V>>
  where
    G: FnOnce(&K) -> ComputeResult<V> + Send + 'static,
  {
    let Some(permit) = self.shared.try_reserve_generation(limit) else {
      Metrics::incr(&self.shared.metrics.limited_rejections);
      return self.get_without_generating(&key, Some(timeout));
    };

    // The permit lives as long as the generator. If another thread is already
    // generating this key, the unused generator is dropped on return and the
    // slot is released with it.
    let generator = move |key: &K| {
      let _permit = permit;
      generator(key)
    };
    self
      .shared
      .get_or_generate_in(
        &self.shared.single,
        key,
        timeout,
        GenerationMode::Background,
        generator,
        || tracing::trace!(section = %self.shared.name, "key already generating; releasing limited slot"),
      )
      .ok()
      .flatten()
  }

  /// Returns the payload for `key` if it is present and resolved. Never
  /// starts a generation. If `extend` is given, the idle deadline of an
  /// existing entry is pushed out to at least that long from now.
  pub fn get_without_generating<B>(&self, key: &B, extend: Option<Duration>) -> Option<Arc<V>>
  where
    K: Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    self
      .shared
      .get_without_generating_in(&self.shared.single, key, extend)
  }

  /// Like [`get_without_generating`](Self::get_without_generating), over the
  /// dual-key namespace.
  pub fn get_without_generating_dual(&self, key0: &K, key1: &K, extend: Option<Duration>) -> Option<Arc<V>> {
    let key = (key0.clone(), key1.clone());
    self
      .shared
      .get_without_generating_in(&self.shared.dual, &key, extend)
  }

  /// Installs `value` for `key`, replacing and destroying any previous entry.
  ///
  /// A generator still running for the replaced entry finishes unobserved; its
  /// result is destroyed instead of published.
  pub fn override_entry(&self, key: K, value: V, timeout: Duration) {
    self
      .shared
      .override_in(&self.shared.single, key, value, timeout)
  }

  /// Like [`override_entry`](Self::override_entry), over the dual-key namespace.
  pub fn override_dual(&self, key0: K, key1: K, value: V, timeout: Duration) {
    self
      .shared
      .override_in(&self.shared.dual, (key0, key1), value, timeout)
  }

  /// Removes and destroys the entry for `key`.
  ///
  /// Returns the destroyed payload. Its `destroy` hook has already run, so it
  /// is only useful for inspection.
  pub fn remove<B>(&self, key: &B) -> Option<Arc<V>>
  where
    K: Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    self.shared.remove_in(&self.shared.single, key)
  }

  /// Like [`remove`](Self::remove), over the dual-key namespace.
  pub fn remove_dual(&self, key0: &K, key1: &K) -> Option<Arc<V>> {
    let key = (key0.clone(), key1.clone());
    self.shared.remove_in(&self.shared.dual, &key)
  }

  /// Removes and destroys every entry, in both namespaces, for which
  /// `predicate` returns `true`. Returns the number of entries removed.
  ///
  /// The predicate runs under a shard lock and must not call back into this
  /// section.
  pub fn remove_if<P>(&self, predicate: P) -> usize
  where
    P: FnMut(EntryKey<'_, K>, &EntryView<'_, V>) -> bool,
  {
    self.shared.remove_if(predicate)
  }

  /// Removes and destroys every entry.
  pub fn clear(&self) -> usize {
    self.shared.clear()
  }

  /// Evicts and destroys every entry whose idle deadline has passed.
  ///
  /// An entry that is still being generated is evicted like any other. Its
  /// waiters are released with `None` and the payload the generator returns
  /// later is destroyed instead of published.
  pub fn sweep(&self) -> usize {
    self.shared.sweep()
  }

  /// Returns `true` if the single-key namespace holds an entry for `key`,
  /// resolved or not.
  pub fn contains<B>(&self, key: &B) -> bool
  where
    K: Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    self.shared.contains_in(&self.shared.single, key)
  }

  /// The number of entries across both namespaces.
  pub fn len(&self) -> usize {
    self.shared.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The name the section was built with.
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// The timeout used by the `*_default` convenience methods.
  pub fn default_timeout(&self) -> Duration {
    self.shared.default_timeout
  }

  /// Returns a snapshot of the section's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot(self.len())
  }
}
