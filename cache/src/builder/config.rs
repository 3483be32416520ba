use super::{SectionBuilder, DEFAULT_TIMEOUT};

use std::hash::BuildHasher;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::Deserialize;

/// Plain-data section settings, typically loaded from a configuration file.
///
/// Every field is optional; unset fields keep the builder's defaults.
///
/// ```
/// # #[cfg(feature = "serde")] {
/// let config: fibre_section::SectionConfig =
///   serde_json::from_str(r#"{ "name": "thumbnails", "default_timeout_ms": 2500 }"#).unwrap();
/// assert_eq!(config.default_timeout(), Some(std::time::Duration::from_millis(2500)));
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SectionConfig {
  pub name: Option<String>,
  pub shards: Option<usize>,
  /// Idle timeout for the `*_default` convenience methods, in milliseconds.
  pub default_timeout_ms: Option<u64>,
  pub validate_keys: Option<bool>,
}

impl SectionConfig {
  pub fn default_timeout(&self) -> Option<Duration> {
    self.default_timeout_ms.map(Duration::from_millis)
  }
}

impl<K, V, H: BuildHasher + Default> SectionBuilder<K, V, H> {
  /// Creates a builder with defaults overridden by `config`.
  pub fn from_config(config: &SectionConfig) -> Self {
    let mut builder = Self::new();
    if let Some(name) = &config.name {
      builder = builder.name(name.clone());
    }
    if let Some(shards) = config.shards {
      builder = builder.shards(shards);
    }
    builder = builder.default_timeout(config.default_timeout().unwrap_or(DEFAULT_TIMEOUT));
    if let Some(validate_keys) = config.validate_keys {
      builder = builder.validate_keys(validate_keys);
    }
    builder
  }
}
