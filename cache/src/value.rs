use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

/// The capability a cached payload exposes to the section that owns it.
///
/// A section calls [`destroy`](CachedValue::destroy) exactly once when the
/// entry holding the payload is evicted, overridden, removed, cleared, or when
/// a freshly generated payload arrives at an entry that was destroyed while
/// its generator was still running.
///
/// The default implementation does nothing, so payloads that own no native
/// resources opt in with an empty impl:
///
/// ```
/// use fibre_section::CachedValue;
///
/// struct Dimensions {
///   width: u32,
///   height: u32,
/// }
///
/// impl CachedValue for Dimensions {}
/// ```
///
/// Payloads are shared with callers as `Arc<V>`, so `destroy` takes `&self`.
/// Types that own GPU or OS handles keep them behind interior mutability and
/// release them here; callers still holding an `Arc` must treat the payload as
/// released afterwards.
pub trait CachedValue: Send + Sync + 'static {
  /// Releases any native resources owned by this payload.
  fn destroy(&self) {}
}

macro_rules! plain_cached_value {
  ($($ty:ty),* $(,)?) => {
    $(impl CachedValue for $ty {})*
  };
}

plain_cached_value!(
  (),
  bool,
  char,
  u8,
  u16,
  u32,
  u64,
  u128,
  usize,
  i8,
  i16,
  i32,
  i64,
  i128,
  isize,
  f32,
  f64,
  String,
  &'static str,
  PathBuf,
);

impl<T: Send + Sync + 'static> CachedValue for Vec<T> {}
impl<T: Send + Sync + 'static> CachedValue for VecDeque<T> {}
impl<K: Send + Sync + 'static, T: Send + Sync + 'static, S: Send + Sync + 'static> CachedValue
  for HashMap<K, T, S>
{
}
impl<K: Send + Sync + 'static, T: Send + Sync + 'static> CachedValue for BTreeMap<K, T> {}

impl<T: CachedValue + ?Sized> CachedValue for Box<T> {
  fn destroy(&self) {
    (**self).destroy()
  }
}

impl<T: CachedValue + ?Sized> CachedValue for Arc<T> {
  fn destroy(&self) {
    (**self).destroy()
  }
}

impl<T: CachedValue> CachedValue for Option<T> {
  fn destroy(&self) {
    if let Some(inner) = self {
      inner.destroy();
    }
  }
}
