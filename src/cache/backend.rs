//! Cache backend abstraction.
//!
//! A backend offers a single atomic "fetch, or compute-store-and-return"
//! primitive ([`CacheBackend::remember_in`]) and, when its driver supports it,
//! tag-scoped flushing. Concurrency guarantees for simultaneous misses on one
//! key are a property of the backend, not of the callers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::config::CacheConfig;
use super::error::CacheError;
use super::file::FileBackend;
use super::memory::MemoryBackend;
use super::tags::TokenStorage;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Driver name this backend was configured under.
    fn driver(&self) -> &str;

    /// Return the value stored under `key` within `scope`, or run `compute`,
    /// store its value for `ttl` and return it.
    ///
    /// An empty `scope` means the entry is not tagged. A failing `compute`
    /// stores nothing and its error is returned unchanged.
    async fn remember_in<E, F, Fut>(
        &self,
        scope: &[String],
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Value, E>
    where
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, E>> + Send;

    /// Drop every entry stored under any of `tags`.
    async fn flush_tags(&self, tags: &[String]) -> Result<(), CacheError>;

    /// View of this backend restricted to `tags`.
    fn scoped_to<'a>(&'a self, tags: &'a [String]) -> TaggedCache<'a, Self>
    where
        Self: Sized,
    {
        TaggedCache {
            backend: self,
            tags,
        }
    }
}

/// A backend together with the tag set its operations are scoped to.
pub struct TaggedCache<'a, B> {
    backend: &'a B,
    tags: &'a [String],
}

impl<B: CacheBackend> TaggedCache<'_, B> {
    pub fn tags(&self) -> &[String] {
        self.tags
    }

    pub async fn remember<E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<Value, E>
    where
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, E>> + Send,
    {
        self.backend
            .remember_in(self.tags, key, ttl, compute)
            .await
    }

    pub async fn flush(&self) -> Result<(), CacheError> {
        self.backend.flush_tags(self.tags).await
    }
}

/// The backend selected by `cache.driver`.
pub enum Backend {
    Memory(MemoryBackend),
    File(FileBackend),
}

impl Backend {
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        match config.driver.as_str() {
            "memory" | "array" => Ok(Self::Memory(MemoryBackend::named(
                config.driver.clone(),
                config.memory_capacity_non_zero(),
            ))),
            "file" => Ok(Self::File(FileBackend::new(&config.file_directory))),
            other => Err(CacheError::unsupported_driver(other)),
        }
    }
}

#[async_trait]
impl CacheBackend for Backend {
    fn driver(&self) -> &str {
        match self {
            Backend::Memory(backend) => backend.driver(),
            Backend::File(backend) => backend.driver(),
        }
    }

    async fn remember_in<E, F, Fut>(
        &self,
        scope: &[String],
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Value, E>
    where
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, E>> + Send,
    {
        match self {
            Backend::Memory(backend) => backend.remember_in(scope, key, ttl, compute).await,
            Backend::File(backend) => backend.remember_in(scope, key, ttl, compute).await,
        }
    }

    async fn flush_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        match self {
            Backend::Memory(backend) => backend.flush_tags(tags).await,
            Backend::File(backend) => backend.flush_tags(tags).await,
        }
    }
}

#[async_trait]
impl TokenStorage for Backend {
    async fn load_token(&self, slot: &str) -> Result<Option<String>, CacheError> {
        match self {
            Backend::Memory(backend) => backend.load_token(slot).await,
            Backend::File(backend) => backend.load_token(slot).await,
        }
    }

    async fn store_token(&self, slot: &str, token: &str) -> Result<(), CacheError> {
        match self {
            Backend::Memory(backend) => backend.store_token(slot, token).await,
            Backend::File(backend) => backend.store_token(slot, token).await,
        }
    }
}
