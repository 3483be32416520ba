use crate::time;
use crate::value::CachedValue;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

/// A completion callback registered by an async caller.
pub(crate) type Callback<V> = Box<dyn FnOnce(Option<Arc<V>>) + Send + 'static>;

/// Represents a waiter in the queue of an unresolved entry.
enum Waiter<V> {
  Sync(Thread),
  Notify(Callback<V>),
}

/// The mutex-protected part of an entry.
struct Slot<V> {
  payload: Option<Arc<V>>,
  has_generator: bool,
  generator_thread: Option<ThreadId>,
  /// Bumped on every `reset`, so a generator that was claimed before the
  /// reset can never publish into the reused slot.
  epoch: u64,
  waiters: VecDeque<Waiter<V>>,
}

/// Proof that the holder won the generator slot of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Claim {
  epoch: u64,
}

/// What `assign` did with a freshly generated payload.
pub(crate) struct Published<V> {
  /// The payload now visible to readers, if any.
  pub(crate) payload: Option<Arc<V>>,
  /// Callbacks that were waiting for this entry to resolve.
  pub(crate) callbacks: Vec<Callback<V>>,
  /// `true` if the payload arrived at a dead entry and was destroyed instead.
  pub(crate) discarded: bool,
}

/// What `destroy` released.
pub(crate) struct Destroyed<V> {
  /// The payload that was destroyed, handed back for optional reuse.
  pub(crate) payload: Option<Arc<V>>,
  /// Callbacks that were waiting for this entry; they observe "no value".
  pub(crate) callbacks: Vec<Callback<V>>,
}

/// The unit of memoization: one payload plus its readiness and lifetime state.
///
/// `has_value` and `destroyed` are mirrored into atomics so readers can check
/// readiness without the slot lock. `has_value` is stored with `Release` after
/// the payload is written and loaded with `Acquire` before it is read.
pub(crate) struct CacheEntry<V> {
  slot: Mutex<Slot<V>>,
  has_value: AtomicBool,
  destroyed: AtomicBool,
  /// Idle deadline in nanoseconds since the cache epoch.
  deadline: AtomicU64,
}

impl<V> fmt::Debug for CacheEntry<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("has_value", &self.has_value.load(Ordering::Relaxed))
      .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
      .field("deadline", &self.deadline.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<V: CachedValue> CacheEntry<V> {
  /// Creates a fresh, unclaimed entry that expires `timeout` from now.
  pub(crate) fn new(timeout: Duration) -> Self {
    Self {
      slot: Mutex::new(Slot {
        payload: None,
        has_generator: false,
        generator_thread: None,
        epoch: 0,
        waiters: VecDeque::new(),
      }),
      has_value: AtomicBool::new(false),
      destroyed: AtomicBool::new(false),
      deadline: AtomicU64::new(time::deadline_after(timeout)),
    }
  }

  /// Creates an entry that is already resolved with `value`.
  ///
  /// The generator slot is marked as taken so no generator ever runs for it.
  pub(crate) fn populated(value: V, timeout: Duration) -> Self {
    Self {
      slot: Mutex::new(Slot {
        payload: Some(Arc::new(value)),
        has_generator: true,
        generator_thread: None,
        epoch: 0,
        waiters: VecDeque::new(),
      }),
      has_value: AtomicBool::new(true),
      destroyed: AtomicBool::new(false),
      deadline: AtomicU64::new(time::deadline_after(timeout)),
    }
  }

  /// Reinitializes a destroyed entry found in the map so it can be reused.
  pub(crate) fn reset(&self, timeout: Duration) {
    let mut slot = self.slot.lock();
    slot.epoch = slot.epoch.wrapping_add(1);
    slot.payload = None;
    slot.has_generator = false;
    slot.generator_thread = None;
    self.has_value.store(false, Ordering::Release);
    self.destroyed.store(false, Ordering::Release);
    self
      .deadline
      .store(time::deadline_after(timeout), Ordering::Relaxed);
  }

  /// Pushes the idle deadline to `timeout` from now. Never shortens it.
  #[inline]
  pub(crate) fn touch(&self, timeout: Duration) {
    self
      .deadline
      .fetch_max(time::deadline_after(timeout), Ordering::Relaxed);
  }

  /// Returns `true` if `now_nanos` lies past the idle deadline.
  #[inline]
  pub(crate) fn is_expired(&self, now_nanos: u64) -> bool {
    now_nanos > self.deadline.load(Ordering::Relaxed)
  }

  /// Time left until the entry becomes eligible for eviction.
  pub(crate) fn expires_in(&self) -> Duration {
    let deadline = self.deadline.load(Ordering::Relaxed);
    Duration::from_nanos(deadline.saturating_sub(time::now_nanos()))
  }

  #[inline]
  pub(crate) fn has_value(&self) -> bool {
    self.has_value.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn is_destroyed(&self) -> bool {
    self.destroyed.load(Ordering::Acquire)
  }

  /// A generation attempt completed, or the entry was destroyed.
  #[inline]
  pub(crate) fn is_resolved(&self) -> bool {
    self.has_value() || self.is_destroyed()
  }

  /// Claims the generator slot. Only the first caller gets a `Claim`.
  ///
  /// Must be called while the owning shard lock is held, so lookup and claim
  /// form a single critical section per key.
  pub(crate) fn claim(&self) -> Option<Claim> {
    let mut slot = self.slot.lock();
    if slot.has_generator {
      return None;
    }
    slot.has_generator = true;
    Some(Claim { epoch: slot.epoch })
  }

  /// Records which thread runs the generator for `claim`.
  pub(crate) fn set_generator_thread(&self, claim: Claim, thread: ThreadId) {
    let mut slot = self.slot.lock();
    if slot.epoch == claim.epoch {
      slot.generator_thread = Some(thread);
    }
  }

  /// Returns `true` if the calling thread is the one generating this entry.
  pub(crate) fn is_generator_thread(&self) -> bool {
    self.slot.lock().generator_thread == Some(thread::current().id())
  }

  /// A generator was dispatched and has not resolved the entry yet.
  pub(crate) fn is_generating(&self) -> bool {
    let slot = self.slot.lock();
    slot.has_generator && !self.is_resolved()
  }

  /// Cheap check used to decide whether a "long wait" diagnostic is due.
  pub(crate) fn needs_long_wait(&self) -> bool {
    !self.has_value() && !self.is_generator_thread()
  }

  /// Returns the payload if the entry is populated and alive.
  ///
  /// Misses and dead entries are answered from the atomics alone. A hit takes
  /// the slot lock only long enough to clone the `Arc`; the lock is never held
  /// across a generator, a `destroy` or a callback.
  pub(crate) fn payload(&self) -> Option<Arc<V>> {
    if !self.has_value() || self.is_destroyed() {
      return None;
    }
    self.slot.lock().payload.clone()
  }

  /// Publishes the result of the generator identified by `claim`.
  ///
  /// If the entry was destroyed (or reset for a newer generation) while the
  /// generator ran, the fresh payload is destroyed here instead of published.
  pub(crate) fn assign(&self, claim: Claim, value: Option<V>) -> Published<V> {
    let mut slot = self.slot.lock();
    if self.is_destroyed() || slot.epoch != claim.epoch {
      drop(slot);
      let discarded = match value {
        Some(value) => {
          value.destroy();
          true
        }
        None => false,
      };
      return Published {
        payload: None,
        callbacks: Vec::new(),
        discarded,
      };
    }

    let payload = value.map(Arc::new);
    slot.payload = payload.clone();
    self.has_value.store(true, Ordering::Release);
    let callbacks = Self::release_waiters(&mut slot);
    drop(slot);

    Published {
      payload,
      callbacks,
      discarded: false,
    }
  }

  /// Destroys the entry and its payload. Returns `None` if it was already
  /// destroyed, which makes destruction idempotent.
  pub(crate) fn destroy(&self) -> Option<Destroyed<V>> {
    let mut slot = self.slot.lock();
    if self.destroyed.load(Ordering::Relaxed) {
      return None;
    }
    self.destroyed.store(true, Ordering::Release);
    let payload = slot.payload.take();
    let callbacks = Self::release_waiters(&mut slot);
    drop(slot);

    // Never run user code under the slot lock.
    if let Some(payload) = &payload {
      payload.destroy();
    }
    Some(Destroyed { payload, callbacks })
  }

  /// Blocks the calling thread until the entry has a value or is destroyed.
  ///
  /// Must not be called by the generating thread of this entry.
  pub(crate) fn await_value(&self) {
    let mut slot = self.slot.lock();
    loop {
      if self.is_resolved() {
        return;
      }
      slot.waiters.push_back(Waiter::Sync(thread::current()));
      drop(slot); // Unlock before parking.
      thread::park();
      slot = self.slot.lock();
    }
  }

  /// Registers `callback` to run once the entry resolves.
  ///
  /// If the entry is already resolved the callback is handed back together
  /// with the value it should receive, and the caller runs it inline.
  pub(crate) fn on_resolved(
    &self,
    callback: Callback<V>,
  ) -> Option<(Callback<V>, Option<Arc<V>>)> {
    let mut slot = self.slot.lock();
    if self.is_destroyed() {
      return Some((callback, None));
    }
    if self.has_value() {
      let payload = slot.payload.clone();
      return Some((callback, payload));
    }
    slot.waiters.push_back(Waiter::Notify(callback));
    None
  }

  fn release_waiters(slot: &mut Slot<V>) -> Vec<Callback<V>> {
    let mut callbacks = Vec::new();
    for waiter in slot.waiters.drain(..) {
      match waiter {
        Waiter::Sync(thread) => thread.unpark(),
        Waiter::Notify(callback) => callbacks.push(callback),
      }
    }
    callbacks
  }
}

/// A read-only view of an entry, handed to `remove_if` predicates.
pub struct EntryView<'a, V> {
  pub(crate) entry: &'a CacheEntry<V>,
}

impl<V: CachedValue> EntryView<'_, V> {
  /// `true` once a generation attempt completed, with or without a value.
  pub fn has_value(&self) -> bool {
    self.entry.has_value()
  }

  /// `true` while a generator is still running for this entry.
  pub fn is_generating(&self) -> bool {
    self.entry.is_generating()
  }

  /// The current payload, if populated.
  pub fn payload(&self) -> Option<Arc<V>> {
    self.entry.payload()
  }

  /// Time left until the entry becomes eligible for idle eviction.
  pub fn expires_in(&self) -> Duration {
    self.entry.expires_in()
  }
}

impl<V> fmt::Debug for EntryView<'_, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(self.entry, f)
  }
}
