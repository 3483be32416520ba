use crate::entry::{CacheEntry, Callback, Claim, EntryView};
use crate::error::{ComputeResult, Result, SectionError};
use crate::metrics::Metrics;
use crate::section::{EntryKey, GenerationMode, SectionKey};
use crate::store::ShardedStore;
use crate::task::notifier::Notifier;
use crate::value::CachedValue;
use crate::{time, TaskSpawner};

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// Extracts a path-like view of a key, used for prefix invalidation.
pub(crate) type KeyPathFn<K> = fn(&K) -> Option<&str>;

/// The internal, thread-safe core of a section.
pub(crate) struct SectionShared<K, V: CachedValue, H> {
  pub(crate) name: Arc<str>,
  pub(crate) single: ShardedStore<K, V, H>,
  pub(crate) dual: ShardedStore<(K, K), V, H>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) notifier: Arc<Notifier>,
  pub(crate) spawner: Option<Arc<dyn TaskSpawner>>,
  pub(crate) key_path: Option<KeyPathFn<K>>,
  pub(crate) validate_keys: bool,
  pub(crate) default_timeout: Duration,
  pub(crate) active_generations: Arc<CachePadded<AtomicUsize>>,
}

impl<K, V: CachedValue, H> fmt::Debug for SectionShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SectionShared")
      .field("name", &self.name)
      .field("validate_keys", &self.validate_keys)
      .field("default_timeout", &self.default_timeout)
      .field("has_spawner", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

/// Outcome of the lookup-and-claim critical section.
struct Lookup<V> {
  entry: Arc<CacheEntry<V>>,
  claim: Option<Claim>,
}

impl<K, V, H> SectionShared<K, V, H>
where
  K: SectionKey,
  V: CachedValue,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Looks up or inserts the entry for `key` and claims its generator slot,
  /// all under one shard write lock. A destroyed entry found in the map is
  /// reset and reused.
  fn lookup_or_insert<Q>(&self, store: &ShardedStore<Q, V, H>, key: &Q, timeout: Duration) -> Lookup<V>
  where
    Q: Eq + Hash + Clone,
  {
    let shard = store.get_shard(key);
    let mut guard = shard.write();
    let (entry, fresh) = match guard.get(key) {
      Some(entry) if entry.is_destroyed() => {
        entry.reset(timeout);
        (entry.clone(), true)
      }
      Some(entry) => (entry.clone(), false),
      None => {
        let entry = Arc::new(CacheEntry::new(timeout));
        guard.insert(key.clone(), entry.clone());
        (entry, true)
      }
    };
    let claim = entry.claim();
    drop(guard);

    if fresh {
      Metrics::incr(&self.metrics.misses);
    } else {
      Metrics::incr(&self.metrics.hits);
    }
    Lookup { entry, claim }
  }

  fn ensure_spawner(&self, mode: GenerationMode) -> Result<()> {
    if mode == GenerationMode::Queued && self.spawner.is_none() {
      return Err(SectionError::SpawnerRequired {
        section: self.name.to_string(),
      });
    }
    Ok(())
  }

  /// The get-or-generate protocol over one key namespace.
  pub(crate) fn get_or_generate_in<Q, G, A>(
    &self,
    store: &ShardedStore<Q, V, H>,
    key: Q,
    timeout: Duration,
    mode: GenerationMode,
    generator: G,
    on_already_generating: A,
  ) -> Result<Option<Arc<V>>>
  where
    Q: SectionKey,
    G: FnOnce(&Q) -> ComputeResult<V> + Send + 'static,
    A: FnOnce(),
  {
    self.ensure_spawner(mode)?;
    if self.validate_keys {
      store.check_key(&self.name, &key);
    }

    let Lookup { entry, claim } = self.lookup_or_insert(store, &key, timeout);
    entry.touch(timeout);

    match claim {
      Some(claim) => self.dispatch(mode, key.clone(), entry.clone(), claim, generator)?,
      None => {
        Metrics::incr(&self.metrics.coalesced);
        on_already_generating();
      }
    }

    if mode == GenerationMode::Blocking && entry.needs_long_wait() {
      Metrics::incr(&self.metrics.long_waits);
      let current = thread::current();
      tracing::debug!(
        section = %self.name,
        key = ?key,
        thread = current.name().unwrap_or("<unnamed>"),
        "waiting for entry generated by another thread"
      );
      entry.await_value();
      tracing::debug!(section = %self.name, key = ?key, "finished waiting for entry");
    }

    Ok(entry.payload())
  }

  /// Like `get_or_generate_in`, but the result is delivered to `callback`
  /// instead of being waited for.
  pub(crate) fn get_or_generate_async_in<Q, G>(
    &self,
    store: &ShardedStore<Q, V, H>,
    key: Q,
    timeout: Duration,
    mode: GenerationMode,
    generator: G,
    callback: Callback<V>,
  ) -> Result<()>
  where
    Q: SectionKey,
    G: FnOnce(&Q) -> ComputeResult<V> + Send + 'static,
  {
    self.ensure_spawner(mode)?;
    if self.validate_keys {
      store.check_key(&self.name, &key);
    }

    let Lookup { entry, claim } = self.lookup_or_insert(store, &key, timeout);
    entry.touch(timeout);

    let dispatched = match claim {
      Some(claim) => self.dispatch(mode, key, entry.clone(), claim, generator),
      None => {
        Metrics::incr(&self.metrics.coalesced);
        Ok(())
      }
    };

    if entry.is_generator_thread() {
      // Reentrant lookup from inside the generator: never wait on ourselves.
      callback(entry.payload());
    } else if let Some((callback, payload)) = entry.on_resolved(callback) {
      callback(payload);
    }

    dispatched
  }

  /// Runs the generator for a freshly claimed entry according to `mode`.
  fn dispatch<Q, G>(
    &self,
    mode: GenerationMode,
    key: Q,
    entry: Arc<CacheEntry<V>>,
    claim: Claim,
    generator: G,
  ) -> Result<()>
  where
    Q: SectionKey,
    G: FnOnce(&Q) -> ComputeResult<V> + Send + 'static,
  {
    Metrics::incr(&self.metrics.generations);
    let job = GenerationJob {
      guard: ResolveGuard {
        entry,
        claim,
        notifier: self.notifier.clone(),
        metrics: self.metrics.clone(),
        resolved: false,
      },
      section: self.name.clone(),
      key,
      generator,
    };

    match mode {
      GenerationMode::Blocking => job.run(false),
      GenerationMode::Background => {
        let spawned = thread::Builder::new()
          .name(format!("section-gen-{}", self.name))
          .spawn(move || {
            let _ = job.run(true);
          });
        if let Err(error) = spawned {
          // The job was dropped with the closure, which resolved the entry.
          tracing::error!(section = %self.name, %error, "failed to spawn generator thread");
        }
        Ok(())
      }
      GenerationMode::Queued => {
        if let Some(spawner) = &self.spawner {
          spawner.spawn(Box::new(move || {
            let _ = job.run(true);
          }));
        }
        Ok(())
      }
    }
  }

  /// Reads an entry without ever triggering generation.
  pub(crate) fn get_without_generating_in<Q, B>(
    &self,
    store: &ShardedStore<Q, V, H>,
    key: &B,
    extend: Option<Duration>,
  ) -> Option<Arc<V>>
  where
    Q: Eq + Hash + Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    if self.validate_keys {
      store.check_key(&self.name, key);
    }
    let entry = store.get_shard(key).read().get(key).cloned();
    let payload = entry.and_then(|entry| {
      if let Some(extend) = extend {
        entry.touch(extend);
      }
      entry.payload()
    });

    if payload.is_some() {
      Metrics::incr(&self.metrics.hits);
    } else {
      Metrics::incr(&self.metrics.misses);
    }
    payload
  }

  /// Replaces any entry for `key` with one already populated with `value`.
  pub(crate) fn override_in<Q>(&self, store: &ShardedStore<Q, V, H>, key: Q, value: V, timeout: Duration)
  where
    Q: SectionKey,
  {
    if self.validate_keys {
      store.check_key(&self.name, &key);
    }
    let fresh = Arc::new(CacheEntry::populated(value, timeout));
    let previous = store.get_shard(&key).write().insert(key.clone(), fresh);

    Metrics::incr(&self.metrics.overrides);
    if let Some(previous) = previous {
      self.destroy_entry(&previous);
    }
    tracing::debug!(section = %self.name, key = ?key, "entry overridden");
  }

  /// Removes and destroys the entry for `key`, returning its payload.
  pub(crate) fn remove_in<Q, B>(&self, store: &ShardedStore<Q, V, H>, key: &B) -> Option<Arc<V>>
  where
    Q: Eq + Hash + Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    if self.validate_keys {
      store.check_key(&self.name, key);
    }
    let removed = store.get_shard(key).write().remove(key)?;
    Metrics::incr(&self.metrics.invalidations);
    self.destroy_entry(&removed)
  }

  pub(crate) fn contains_in<Q, B>(&self, store: &ShardedStore<Q, V, H>, key: &B) -> bool
  where
    Q: Eq + Hash + Borrow<B>,
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    if self.validate_keys {
      store.check_key(&self.name, key);
    }
    store.get_shard(key).read().contains_key(key)
  }

  /// Destroys and removes every entry matching `predicate`, in both namespaces.
  pub(crate) fn remove_if<P>(&self, mut predicate: P) -> usize
  where
    P: FnMut(EntryKey<'_, K>, &EntryView<'_, V>) -> bool,
  {
    let mut removed = self.retain_in(&self.single, |key, view| {
      predicate(EntryKey::Single(key), view)
    });
    removed += self.retain_in(&self.dual, |(key0, key1), view| {
      predicate(EntryKey::Dual(key0, key1), view)
    });
    Metrics::add(&self.metrics.invalidations, removed as u64);
    removed
  }

  /// Destroys and removes every entry.
  pub(crate) fn clear(&self) -> usize {
    self.remove_if(|_, _| true)
  }

  /// Evicts every entry whose idle deadline has passed, including entries
  /// whose generator is still running. Such a generator's late payload is
  /// destroyed when it tries to publish.
  pub(crate) fn sweep(&self) -> usize {
    let now = time::now_nanos();
    let is_idle = |view: &EntryView<'_, V>| view.entry.is_expired(now);
    let mut evicted = self.retain_in(&self.single, |_, view| is_idle(view));
    evicted += self.retain_in(&self.dual, |_, view| is_idle(view));

    if evicted > 0 {
      Metrics::add(&self.metrics.evicted_by_idle, evicted as u64);
      tracing::debug!(section = %self.name, evicted, "swept idle entries");
    }
    evicted
  }

  /// Removes entries selected by `evict` shard by shard. Each shard's victims
  /// are destroyed after its lock is released.
  fn retain_in<Q, P>(&self, store: &ShardedStore<Q, V, H>, mut evict: P) -> usize
  where
    Q: Eq + Hash,
    P: FnMut(&Q, &EntryView<'_, V>) -> bool,
  {
    let mut removed = 0;
    for shard in store.iter_shards() {
      let mut victims = Vec::new();
      shard.write().retain(|key, entry| {
        if evict(key, &EntryView { entry: &**entry }) {
          victims.push(entry.clone());
          false
        } else {
          true
        }
      });

      removed += victims.len();
      for victim in victims {
        self.destroy_entry(&victim);
      }
    }
    removed
  }

  /// Invalidates entries whose key, or first key component, is a path
  /// starting with `prefix`.
  pub(crate) fn invalidate_by_prefix(&self, prefix: &str) -> usize {
    let Some(key_path) = self.key_path else {
      return 0;
    };
    let under_prefix = |key: &K| key_path(key).is_some_and(|path| path.starts_with(prefix));
    self.remove_if(|key, _| match key {
      EntryKey::Single(key) => under_prefix(key),
      EntryKey::Dual(key0, _) => under_prefix(key0),
    })
  }

  /// Destroys an entry that was already unlinked from its map.
  fn destroy_entry(&self, entry: &CacheEntry<V>) -> Option<Arc<V>> {
    let destroyed = entry.destroy()?;
    if destroyed.payload.is_some() {
      Metrics::incr(&self.metrics.destroyed_payloads);
    }
    self.notifier.deliver(destroyed.callbacks, None);
    destroyed.payload
  }

  /// Reserves one of `limit` concurrent generation slots.
  pub(crate) fn try_reserve_generation(&self, limit: usize) -> Option<GenerationPermit> {
    self
      .active_generations
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
        (active < limit).then_some(active + 1)
      })
      .ok()
      .map(|_| GenerationPermit {
        active: self.active_generations.clone(),
      })
  }

  pub(crate) fn len(&self) -> usize {
    self.single.len() + self.dual.len()
  }
}

impl<K, V: CachedValue, H> Drop for SectionShared<K, V, H> {
  fn drop(&mut self) {
    // Destroy whatever is left so native resources are released exactly once.
    let mut entries = Vec::new();
    for shard in self.single.iter_shards() {
      entries.extend(shard.write().drain().map(|(_, entry)| entry));
    }
    for shard in self.dual.iter_shards() {
      entries.extend(shard.write().drain().map(|(_, entry)| entry));
    }
    for entry in entries {
      if let Some(destroyed) = entry.destroy() {
        self.notifier.deliver(destroyed.callbacks, None);
      }
    }
  }
}

/// One concurrent generation slot of a limited lookup. Released on drop.
pub(crate) struct GenerationPermit {
  active: Arc<CachePadded<AtomicUsize>>,
}

impl Drop for GenerationPermit {
  fn drop(&mut self) {
    self.active.fetch_sub(1, Ordering::AcqRel);
  }
}

/// A generator bound to the entry it must resolve.
struct GenerationJob<Q, V: CachedValue, G> {
  guard: ResolveGuard<V>,
  section: Arc<str>,
  key: Q,
  generator: G,
}

impl<Q, V, G> GenerationJob<Q, V, G>
where
  Q: SectionKey,
  V: CachedValue,
  G: FnOnce(&Q) -> ComputeResult<V>,
{
  /// Runs the generator on the current thread and resolves the entry.
  ///
  /// A fault is returned to the caller unless the job is `detached`, in which
  /// case nobody is waiting for a return value and the fault is logged here.
  fn run(self, detached: bool) -> Result<()> {
    let GenerationJob {
      guard,
      section,
      key,
      generator,
    } = self;
    guard
      .entry
      .set_generator_thread(guard.claim, thread::current().id());

    let (value, fault) = match generator(&key) {
      ComputeResult::Ok(value) => (Some(value), None),
      ComputeResult::Absent => {
        Metrics::incr(&guard.metrics.absent);
        (None, None)
      }
      ComputeResult::NotFound(what) => {
        Metrics::incr(&guard.metrics.not_found);
        tracing::warn!(section = %section, key = ?key, what = %what, "resource not found; caching absence");
        (None, None)
      }
      ComputeResult::ShuttingDown => {
        tracing::trace!(section = %section, key = ?key, "generator interrupted by shutdown");
        (None, None)
      }
      ComputeResult::Fail(source) => {
        Metrics::incr(&guard.metrics.faults);
        (None, Some(source))
      }
    };

    // Resolve before reporting, so waiters are never left blocked by a fault.
    guard.resolve(value);

    let Some(source) = fault else {
      return Ok(());
    };
    let error = SectionError::Generator {
      section: section.to_string(),
      key: format!("{key:?}"),
      source,
    };
    if detached {
      tracing::error!(section = %section, key = ?key, error = %error, "detached generator failed");
      return Ok(());
    }
    Err(error)
  }
}

/// Resolves a claimed entry exactly once: with the generator's result, or with
/// "no value" if the generator panicked or its job was dropped unrun.
struct ResolveGuard<V: CachedValue> {
  entry: Arc<CacheEntry<V>>,
  claim: Claim,
  notifier: Arc<Notifier>,
  metrics: Arc<Metrics>,
  resolved: bool,
}

impl<V: CachedValue> ResolveGuard<V> {
  fn resolve(mut self, value: Option<V>) {
    self.resolved = true;
    self.publish(value);
  }

  fn publish(&self, value: Option<V>) {
    let published = self.entry.assign(self.claim, value);
    if published.discarded {
      Metrics::incr(&self.metrics.destroyed_payloads);
      tracing::debug!("generated payload arrived at a destroyed entry and was destroyed");
    }
    self.notifier.deliver(published.callbacks, published.payload);
  }
}

impl<V: CachedValue> Drop for ResolveGuard<V> {
  fn drop(&mut self) {
    if !self.resolved {
      self.publish(None);
    }
  }
}
