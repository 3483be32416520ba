//! Named, concurrent compute caches that generate each value at most once.
//!
//! A [`CacheSection`] maps keys to lazily generated payloads. The first caller
//! for a missing key runs its generator; every concurrent caller for the same
//! key waits for, or is called back with, that one result. Entries carry an
//! idle timeout that each access pushes out, and are evicted by periodic
//! sweeps. Payloads with native resources implement [`CachedValue::destroy`],
//! which the section calls exactly once when the entry dies.
//!
//! # Features
//! - **Coalesced generation**: At most one generator per key, with blocking,
//!   background-thread and caller-queued execution modes.
//! - **High Concurrency**: Sharded maps; no lock is held across a generator,
//!   a payload `destroy` or a user callback.
//! - **Dual keys**: A second namespace keyed by pairs, isolated from single keys.
//! - **Maintenance**: A [`CacheRegistry`] sweeps, clears and invalidates many
//!   sections at once, optionally from a background [`Sweeper`].
//! - **Observability**: Per-section metrics and structured `tracing` events.
//!
//! ```
//! use fibre_section::{CacheSection, ComputeResult, GenerationMode};
//! use std::time::Duration;
//!
//! let section = CacheSection::<String, usize>::builder()
//!   .name("lengths")
//!   .build()
//!   .unwrap();
//!
//! let value = section
//!   .get_or_generate("hello".to_string(), Duration::from_secs(5), GenerationMode::Blocking, |key| {
//!     ComputeResult::Ok(key.len())
//!   })
//!   .unwrap();
//! assert_eq!(value.as_deref(), Some(&5));
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod section;
pub mod value;

// Internal, crate-only modules
mod entry;
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::{SectionBuilder, SectionConfig};
pub use entry::EntryView;
pub use error::{BoxError, BuildError, ComputeResult, SectionError};
pub use metrics::MetricsSnapshot;
pub use registry::{CacheRegistry, SectionMaintenance};
pub use runtime::{Task, TaskSpawner};
pub use section::{CacheSection, EntryKey, GenerationMode, SectionKey};
pub use task::sweeper::Sweeper;
pub use value::CachedValue;

#[cfg(feature = "rayon")]
pub use runtime::RayonSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
