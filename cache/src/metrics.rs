use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for a section.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Generation ---
  pub(crate) generations: CachePadded<AtomicU64>,
  pub(crate) coalesced: CachePadded<AtomicU64>,
  pub(crate) absent: CachePadded<AtomicU64>,
  pub(crate) not_found: CachePadded<AtomicU64>,
  pub(crate) faults: CachePadded<AtomicU64>,
  pub(crate) long_waits: CachePadded<AtomicU64>,
  pub(crate) limited_rejections: CachePadded<AtomicU64>,

  // --- Maintenance ---
  pub(crate) overrides: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,
  pub(crate) evicted_by_idle: CachePadded<AtomicU64>,
  pub(crate) destroyed_payloads: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      generations: CachePadded::new(AtomicU64::new(0)),
      coalesced: CachePadded::new(AtomicU64::new(0)),
      absent: CachePadded::new(AtomicU64::new(0)),
      not_found: CachePadded::new(AtomicU64::new(0)),
      faults: CachePadded::new(AtomicU64::new(0)),
      long_waits: CachePadded::new(AtomicU64::new(0)),
      limited_rejections: CachePadded::new(AtomicU64::new(0)),
      overrides: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      evicted_by_idle: CachePadded::new(AtomicU64::new(0)),
      destroyed_payloads: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn add(counter: &AtomicU64, n: u64) {
    if n > 0 {
      counter.fetch_add(n, Ordering::Relaxed);
    }
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self, current_entries: usize) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      generations: self.generations.load(Ordering::Relaxed),
      coalesced: self.coalesced.load(Ordering::Relaxed),
      absent: self.absent.load(Ordering::Relaxed),
      not_found: self.not_found.load(Ordering::Relaxed),
      faults: self.faults.load(Ordering::Relaxed),
      long_waits: self.long_waits.load(Ordering::Relaxed),
      limited_rejections: self.limited_rejections.load(Ordering::Relaxed),
      overrides: self.overrides.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evicted_by_idle: self.evicted_by_idle.load(Ordering::Relaxed),
      destroyed_payloads: self.destroyed_payloads.load(Ordering::Relaxed),
      current_entries: current_entries as u64,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of a section's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups that found an existing entry (populated or still generating).
  pub hits: u64,
  /// Lookups that had to create an entry or found nothing.
  pub misses: u64,
  /// The hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Generator runs dispatched.
  pub generations: u64,
  /// Callers that found a generator already in flight and did not start one.
  pub coalesced: u64,
  /// Generator runs that produced no value.
  pub absent: u64,
  /// Generator runs that reported a missing resource.
  pub not_found: u64,
  /// Generator runs that failed.
  pub faults: u64,
  /// Blocking callers that had to wait for another thread's generator.
  pub long_waits: u64,
  /// Limited lookups turned away because the generation limit was reached.
  pub limited_rejections: u64,
  /// Entries replaced through `override_entry`.
  pub overrides: u64,
  /// Entries removed explicitly (`remove`, `remove_if`, `clear`).
  pub invalidations: u64,
  /// Entries evicted by `sweep` after their idle deadline passed.
  pub evicted_by_idle: u64,
  /// Payloads whose `destroy` was called.
  pub destroyed_payloads: u64,
  /// Entries currently held, across both key namespaces.
  pub current_entries: u64,
  /// The number of seconds the section has existed.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("generations", &self.generations)
      .field("coalesced", &self.coalesced)
      .field("absent", &self.absent)
      .field("not_found", &self.not_found)
      .field("faults", &self.faults)
      .field("long_waits", &self.long_waits)
      .field("limited_rejections", &self.limited_rejections)
      .field("overrides", &self.overrides)
      .field("invalidations", &self.invalidations)
      .field("evicted_by_idle", &self.evicted_by_idle)
      .field("destroyed_payloads", &self.destroyed_payloads)
      .field("current_entries", &self.current_entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
