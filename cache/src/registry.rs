use crate::section::{CacheSection, SectionKey};
use crate::shared::SectionShared;
use crate::task::sweeper::Sweeper;
use crate::value::CachedValue;

use core::fmt;
use std::hash::BuildHasher;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

/// The maintenance operations a registry can run on a section without
/// knowing its key and value types.
pub trait SectionMaintenance: Send + Sync {
  fn name(&self) -> &str;

  /// Evicts idle entries. Returns the number evicted.
  fn sweep(&self) -> usize;

  /// Removes every entry. Returns the number removed.
  fn clear(&self) -> usize;

  /// Removes entries whose key path starts with `prefix`. Sections without a
  /// key path extractor remove nothing.
  fn invalidate_by_prefix(&self, prefix: &str) -> usize;

  fn len(&self) -> usize;
}

impl<K, V, H> SectionMaintenance for SectionShared<K, V, H>
where
  K: SectionKey,
  V: CachedValue,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn sweep(&self) -> usize {
    SectionShared::sweep(self)
  }

  fn clear(&self) -> usize {
    SectionShared::clear(self)
  }

  fn invalidate_by_prefix(&self, prefix: &str) -> usize {
    SectionShared::invalidate_by_prefix(self, prefix)
  }

  fn len(&self) -> usize {
    SectionShared::len(self)
  }
}

/// A set of sections maintained together.
///
/// The registry only holds weak references; a section that is dropped
/// disappears from it on the next operation. Clones share the same set.
#[derive(Clone, Default)]
pub struct CacheRegistry {
  sections: Arc<Mutex<Vec<Weak<dyn SectionMaintenance>>>>,
}

impl fmt::Debug for CacheRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheRegistry")
      .field("sections", &self.section_names())
      .finish()
  }
}

impl CacheRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds `section` to the registry. Registering the same section twice has
  /// no effect.
  pub fn register<K, V, H>(&self, section: &CacheSection<K, V, H>)
  where
    K: SectionKey,
    V: CachedValue,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let shared: Arc<dyn SectionMaintenance> = section.shared.clone();
    let weak = Arc::downgrade(&shared);
    let mut sections = self.sections.lock();
    if !sections.iter().any(|known| known.ptr_eq(&weak)) {
      sections.push(weak);
    }
  }

  /// Upgrades every live section, pruning dead ones, sorted by name.
  ///
  /// The registry lock is released before the caller touches any section.
  fn live_sections(&self) -> Vec<Arc<dyn SectionMaintenance>> {
    let mut live = {
      let mut sections = self.sections.lock();
      let mut live = Vec::with_capacity(sections.len());
      sections.retain(|weak| match weak.upgrade() {
        Some(section) => {
          live.push(section);
          true
        }
        None => false,
      });
      live
    };
    live.sort_by(|a, b| a.name().cmp(b.name()));
    live
  }

  /// Sweeps every registered section in name order. Returns the total number
  /// of entries evicted.
  pub fn sweep_all(&self) -> usize {
    let evicted: usize = self
      .live_sections()
      .iter()
      .map(|section| section.sweep())
      .sum();
    tracing::debug!(evicted, "swept all sections");
    evicted
  }

  /// Clears every registered section. Returns the total number of entries
  /// removed.
  pub fn clear_all(&self) -> usize {
    self
      .live_sections()
      .iter()
      .map(|section| section.clear())
      .sum()
  }

  /// Removes, from every section that has a key path extractor, each entry
  /// whose path starts with `prefix`.
  pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
    let removed: usize = self
      .live_sections()
      .iter()
      .map(|section| section.invalidate_by_prefix(prefix))
      .sum();
    tracing::debug!(prefix, removed, "invalidated entries by prefix");
    removed
  }

  /// The names of every live section, sorted.
  pub fn section_names(&self) -> Vec<String> {
    self
      .live_sections()
      .iter()
      .map(|section| section.name().to_string())
      .collect()
  }

  /// The number of live sections.
  pub fn len(&self) -> usize {
    self.live_sections().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Starts a background thread that calls [`sweep_all`](Self::sweep_all)
  /// every `interval`, until the returned [`Sweeper`] is stopped or dropped.
  pub fn spawn_sweeper(&self, interval: Duration) -> Sweeper {
    Sweeper::spawn(self.clone(), interval)
  }
}
