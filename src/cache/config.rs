//! Cache configuration.
//!
//! Selects the backend driver and controls whether widget caching runs at all.
//!
//! ```toml
//! [cache]
//! enabled = true
//! driver = "file"
//! file_directory = "storage/fragcache"
//! ```

use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_DRIVER: &str = "memory";
const DEFAULT_MEMORY_CAPACITY: usize = 1000;
const DEFAULT_FILE_DIRECTORY: &str = "storage/fragcache";
const DEFAULT_LOCALE: &str = "en";

/// Drivers that cannot scope reads or flushes by tag.
///
/// Keys for these drivers carry tag tokens instead.
const UNTAGGABLE_DRIVERS: [&str; 2] = ["file", "database"];

/// Cache configuration from `fragcache.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off every widget is computed on each call.
    pub enabled: bool,
    /// Backend driver name.
    pub driver: String,
    /// Maximum entries held by the memory driver.
    pub memory_capacity: usize,
    /// Root directory of the file driver.
    pub file_directory: PathBuf,
    /// Locale used when no request locale is in scope.
    pub default_locale: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            driver: DEFAULT_DRIVER.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            file_directory: PathBuf::from(DEFAULT_FILE_DIRECTORY),
            default_locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl CacheConfig {
    /// Returns true if the configured driver can scope entries by tag.
    ///
    /// This is a lookup on the driver name; the backend is never consulted.
    pub fn supports_tag_scoping(&self) -> bool {
        driver_supports_tags(&self.driver)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Returns true unless `driver` is one of the known untaggable drivers.
pub fn driver_supports_tags(driver: &str) -> bool {
    !UNTAGGABLE_DRIVERS.contains(&driver)
}
