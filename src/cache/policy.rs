//! Decides whether widget caching runs at all.

use super::config::CacheConfig;
use super::error::CacheError;

/// Global caching switch consulted before every cached call.
///
/// Errors are returned to the caller; no cached value is served in their place.
pub trait CachePolicy: Send + Sync {
    fn should_use_cache(&self) -> Result<bool, CacheError>;
}

/// Policy backed by the `cache.enabled` setting.
#[derive(Debug, Clone, Copy)]
pub struct SettingsPolicy {
    enabled: bool,
}

impl SettingsPolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl From<&CacheConfig> for SettingsPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.enabled)
    }
}

impl CachePolicy for SettingsPolicy {
    fn should_use_cache(&self) -> Result<bool, CacheError> {
        Ok(self.enabled)
    }
}

impl<F> CachePolicy for F
where
    F: Fn() -> Result<bool, CacheError> + Send + Sync,
{
    fn should_use_cache(&self) -> Result<bool, CacheError> {
        self()
    }
}
