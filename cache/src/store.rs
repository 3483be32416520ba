use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// The map held by one shard of a key namespace.
pub(crate) type ShardMap<Q, V, H> = HashMap<Q, Arc<CacheEntry<V>>, H>;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<Q: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &Q) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// One key namespace of a section, partitioned into independently locked shards.
///
/// Operations on different keys rarely contend for the same lock, and no lock
/// is ever held across a generator call or a blocking wait.
pub(crate) struct ShardedStore<Q, V, H> {
  shards: Box<[CachePadded<RwLock<ShardMap<Q, V, H>>>]>,
  hasher: H,
}

impl<Q, V, H> fmt::Debug for ShardedStore<Q, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<Q, V, H> ShardedStore<Q, V, H> {
  /// Returns an iterator over all the shard locks.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &RwLock<ShardMap<Q, V, H>>> {
    self.shards.iter().map(|padded_lock| &**padded_lock)
  }
}

impl<Q, V, H> ShardedStore<Q, V, H>
where
  Q: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore`. `num_shards` must be a power of two.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  /// Returns the lock guarding the shard that owns `key`.
  #[inline]
  pub(crate) fn get_shard<B: Hash + ?Sized>(&self, key: &B) -> &RwLock<ShardMap<Q, V, H>> {
    let hash = hash_key(&self.hasher, key);
    &self.shards[hash as usize & (self.shards.len() - 1)]
  }

  /// The number of entries across all shards. Takes each read lock in turn,
  /// so the result is only a snapshot.
  pub(crate) fn len(&self) -> usize {
    self.iter_shards().map(|shard| shard.read().len()).sum()
  }

  /// Enforces the key contract: a key must equal itself and hash the same way
  /// twice in a row. A violation is a bug in the caller's key type.
  #[allow(clippy::eq_op)]
  pub(crate) fn check_key<B>(&self, section: &str, key: &B)
  where
    B: Eq + Hash + fmt::Debug + ?Sized,
  {
    if key != key {
      panic!("section '{section}': key {key:?} does not equal itself; its Eq impl is broken");
    }
    let first = hash_key(&self.hasher, key);
    let second = hash_key(&self.hasher, key);
    if first != second {
      panic!("section '{section}': key {key:?} hashed to {first:#x} then {second:#x}; its Hash impl is unstable");
    }
  }
}
