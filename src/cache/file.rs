//! File-system cache backend.
//!
//! Each entry is a JSON file named after the SHA-256 of its key and holding the
//! value together with its expiry. Tag tokens are stored the same way under a
//! separate directory and never expire, which makes this backend the durable
//! token store. Files are written to a temporary name and renamed into place.
//!
//! This driver cannot scope by tag; widgets fold tag tokens into their keys
//! instead.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::CacheBackend;
use super::error::CacheError;
use super::flight::FlightMap;
use super::keys::sha256_hex;
use super::tags::TokenStorage;

const DRIVER: &str = "file";
const ENTRIES_DIR: &str = "entries";
const TOKENS_DIR: &str = "tokens";

const METRIC_HIT: &str = "fragcache_hit_total";
const METRIC_MISS: &str = "fragcache_miss_total";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    /// Unix milliseconds; `None` never expires.
    expires_at_ms: Option<i64>,
    value: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    slot: String,
    token: String,
}

pub struct FileBackend {
    root: PathBuf,
    in_flight: FlightMap<String>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: FlightMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(ENTRIES_DIR)
            .join(format!("{}.json", sha256_hex(key)))
    }

    fn token_path(&self, slot: &str) -> PathBuf {
        self.root
            .join(TOKENS_DIR)
            .join(format!("{}.json", sha256_hex(slot)))
    }

    async fn lookup(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.entry_path(key);
        let entry = match read_json::<StoredEntry>(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(CacheError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), reason = %reason, "Ignoring corrupt cache entry");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if entry.key != key {
            return Ok(None);
        }

        if entry
            .expires_at_ms
            .is_some_and(|deadline| deadline <= now_ms())
        {
            remove_file(&path).await?;
            return Ok(None);
        }

        Ok(Some(entry.value))
    }

    async fn store(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let expires_at_ms = i64::try_from(ttl.as_millis())
            .ok()
            .and_then(|ttl_ms| now_ms().checked_add(ttl_ms));
        let entry = StoredEntry {
            key: key.to_string(),
            expires_at_ms,
            value,
        };
        write_json(&self.entry_path(key), &entry).await
    }

    async fn lookup_or_compute<E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Value, E>
    where
        E: From<CacheError> + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, E>> + Send,
    {
        if let Some(value) = self.lookup(key).await? {
            counter!(METRIC_HIT, "driver" => DRIVER).increment(1);
            debug!(cache = "widget", driver = DRIVER, outcome = "hit", "serving cached fragment");
            return Ok(value);
        }

        counter!(METRIC_MISS, "driver" => DRIVER).increment(1);
        debug!(cache = "widget", driver = DRIVER, outcome = "miss", "computing fragment");
        let value = compute().await?;
        self.store(key, value.clone(), ttl).await?;
        Ok(value)
    }
}

#[async_trait]
impl CacheBackend for FileBackend {
    fn driver(&self) -> &str {
        DRIVER
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
        if !scope.is_empty() {
            return Err(CacheError::tags_unsupported(DRIVER).into());
        }

        let flight = self.in_flight.join(key.to_string());
        let _turn = flight.turn().await;
        self.lookup_or_compute(key, ttl, compute).await
    }

    async fn flush_tags(&self, _tags: &[String]) -> Result<(), CacheError> {
        Err(CacheError::tags_unsupported(DRIVER))
    }
}

#[async_trait]
impl TokenStorage for FileBackend {
    async fn load_token(&self, slot: &str) -> Result<Option<String>, CacheError> {
        let path = self.token_path(slot);
        match read_json::<StoredToken>(&path).await {
            Ok(Some(stored)) if stored.slot == slot => Ok(Some(stored.token)),
            Ok(_) => Ok(None),
            Err(CacheError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), reason = %reason, "Replacing corrupt tag token");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn store_token(&self, slot: &str, token: &str) -> Result<(), CacheError> {
        let stored = StoredToken {
            slot: slot.to_string(),
            token: token.to_string(),
        };
        write_json(&self.token_path(slot), &stored).await
    }
}

fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| CacheError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CacheError::io(path, err)),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| CacheError::io(parent, err))?;
    }

    let bytes = serde_json::to_vec(value)?;
    let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&staging, bytes)
        .await
        .map_err(|err| CacheError::io(&staging, err))?;

    if let Err(err) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(CacheError::io(path, err));
    }
    Ok(())
}

async fn remove_file(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::io(path, err)),
    }
}
