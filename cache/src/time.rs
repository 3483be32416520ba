use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all deadline calculations.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts an `Instant` into nanoseconds since the cache epoch.
#[inline]
pub(crate) fn instant_to_nanos(instant: Instant) -> u64 {
  instant.saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

/// The current monotonic time in nanoseconds since the cache epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  instant_to_nanos(Instant::now())
}

/// The deadline `timeout` from now, saturating instead of overflowing.
#[inline]
pub(crate) fn deadline_after(timeout: Duration) -> u64 {
  now_nanos().saturating_add(timeout.as_nanos().min(u64::MAX as u128) as u64)
}
