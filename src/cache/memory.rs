//! In-process cache backend.
//!
//! Entries live in an LRU with per-entry expiry, keyed by the tag set they
//! were stored under together with their key, so each tag set is a separate
//! namespace. A flush of any one tag drops every entry carrying it, and a
//! computation that started before the flush does not store its result.
//! Concurrent misses on the same key wait for a single computation.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use super::backend::CacheBackend;
use super::error::CacheError;
use super::flight::FlightMap;
use super::lock::{mutex_lock, rw_read, rw_write};
use super::tags::TokenStorage;

const SOURCE: &str = "cache::memory";
const DEFAULT_DRIVER: &str = "memory";

const METRIC_HIT: &str = "fragcache_hit_total";
const METRIC_MISS: &str = "fragcache_miss_total";

/// Tag set and key of a stored entry.
type Slot = (Vec<String>, String);

struct Entry {
    value: Value,
    /// `None` when the lifetime does not fit in an `Instant`.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

struct Shelf {
    entries: LruCache<Slot, Entry>,
    /// Bumped by every flush.
    generation: u64,
    /// Generation of the latest flush of each tag.
    flushed_at: HashMap<String, u64>,
}

impl Shelf {
    fn flushed_since(&self, tags: &[String], generation: u64) -> bool {
        tags.iter()
            .any(|tag| self.flushed_at.get(tag).is_some_and(|&at| at > generation))
    }
}

pub struct MemoryBackend {
    driver: String,
    shelf: Mutex<Shelf>,
    in_flight: FlightMap<Slot>,
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::named(DEFAULT_DRIVER, capacity)
    }

    /// A memory backend reporting `driver` as its driver name.
    pub fn named(driver: impl Into<String>, capacity: NonZeroUsize) -> Self {
        Self {
            driver: driver.into(),
            shelf: Mutex::new(Shelf {
                entries: LruCache::new(capacity),
                generation: 0,
                flushed_at: HashMap::new(),
            }),
            in_flight: FlightMap::new(),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        mutex_lock(&self.shelf, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored value for `slot` and the current flush generation.
    fn lookup(&self, slot: &Slot) -> (Option<Value>, u64) {
        let mut shelf = mutex_lock(&self.shelf, SOURCE, "lookup");
        let generation = shelf.generation;
        let expired = match shelf.entries.get(slot) {
            Some(entry) if entry.is_live(Instant::now()) => {
                return (Some(entry.value.clone()), generation);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            shelf.entries.pop(slot);
        }
        (None, generation)
    }

    /// Store unless one of the slot's tags was flushed after `generation`.
    fn store(&self, slot: Slot, value: Value, ttl: Duration, generation: u64) {
        let mut shelf = mutex_lock(&self.shelf, SOURCE, "store");
        if shelf.flushed_since(&slot.0, generation) {
            debug!(driver = %self.driver, tags = ?slot.0, "discarding fragment computed across a flush");
            return;
        }
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        shelf.entries.put(slot, entry);
    }

    fn record_hit(&self) {
        counter!(METRIC_HIT, "driver" => self.driver.clone()).increment(1);
        debug!(cache = "widget", driver = %self.driver, outcome = "hit", "serving cached fragment");
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn driver(&self) -> &str {
        &self.driver
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
        let slot: Slot = (scope.to_vec(), key.to_string());
        if let (Some(value), _) = self.lookup(&slot) {
            self.record_hit();
            return Ok(value);
        }

        let flight = self.in_flight.join(slot.clone());
        let _turn = flight.turn().await;
        let generation = match self.lookup(&slot) {
            (Some(value), _) => {
                self.record_hit();
                return Ok(value);
            }
            (None, generation) => generation,
        };

        counter!(METRIC_MISS, "driver" => self.driver.clone()).increment(1);
        debug!(cache = "widget", driver = %self.driver, outcome = "miss", "computing fragment");
        let value = compute().await?;
        self.store(slot, value.clone(), ttl, generation);
        Ok(value)
    }

    async fn flush_tags(&self, tags: &[String]) -> Result<(), CacheError> {
        let mut shelf = mutex_lock(&self.shelf, SOURCE, "flush_tags");
        shelf.generation += 1;
        let generation = shelf.generation;
        for tag in tags {
            shelf.flushed_at.insert(tag.clone(), generation);
        }

        let doomed: Vec<Slot> = shelf
            .entries
            .iter()
            .filter(|((scope, _), _)| scope.iter().any(|tag| tags.contains(tag)))
            .map(|(slot, _)| slot.clone())
            .collect();
        for slot in &doomed {
            shelf.entries.pop(slot);
        }
        debug!(driver = %self.driver, flushed = doomed.len(), "flushed tagged entries");
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for MemoryBackend {
    async fn load_token(&self, slot: &str) -> Result<Option<String>, CacheError> {
        Ok(rw_read(&self.tokens, SOURCE, "load_token").get(slot).cloned())
    }

    async fn store_token(&self, slot: &str, token: &str) -> Result<(), CacheError> {
        rw_write(&self.tokens, SOURCE, "store_token").insert(slot.to_string(), token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn backend() -> MemoryBackend {
        MemoryBackend::new(NonZeroUsize::new(16).unwrap())
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    async fn remember_counting(
        backend: &MemoryBackend,
        scope: &[String],
        key: &str,
        ttl: Duration,
        calls: &AtomicUsize,
        value: &str,
    ) -> Value {
        backend
            .remember_in::<CacheError, _, _>(scope, key, ttl, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(value))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let backend = backend();
        let calls = AtomicUsize::new(0);

        let first = remember_counting(&backend, &[], "k", MINUTE, &calls, "a").await;
        let second = remember_counting(&backend, &[], "k", MINUTE, &calls, "b").await;

        assert_eq!(first, Value::from("a"));
        assert_eq!(second, Value::from("a"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_recomputed() {
        let backend = backend();
        let calls = AtomicUsize::new(0);

        remember_counting(&backend, &[], "k", Duration::from_millis(20), &calls, "a").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let value = remember_counting(&backend, &[], "k", MINUTE, &calls, "b").await;

        assert_eq!(value, Value::from("b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_computation_stores_nothing() {
        let backend = backend();

        let err = backend
            .remember_in::<CacheError, _, _>(&[], "k", MINUTE, || async {
                Err(CacheError::policy("boom"))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn tag_sets_are_separate_namespaces() {
        let backend = backend();
        let calls = AtomicUsize::new(0);

        remember_counting(&backend, &tags(&["home"]), "k", MINUTE, &calls, "tagged").await;
        let untagged = remember_counting(&backend, &[], "k", MINUTE, &calls, "plain").await;

        assert_eq!(untagged, Value::from("plain"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_drops_entries_carrying_any_flushed_tag() {
        let backend = backend();
        let calls = AtomicUsize::new(0);

        remember_counting(&backend, &tags(&["home", "news"]), "a", MINUTE, &calls, "a").await;
        remember_counting(&backend, &tags(&["sidebar"]), "b", MINUTE, &calls, "b").await;
        remember_counting(&backend, &[], "c", MINUTE, &calls, "c").await;

        backend.flush_tags(&tags(&["news"])).await.unwrap();

        assert_eq!(backend.len(), 2);
        remember_counting(&backend, &tags(&["home", "news"]), "a", MINUTE, &calls, "a2").await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_compute_once() {
        let backend = Arc::new(backend());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let backend = Arc::clone(&backend);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                backend
                    .remember_in::<CacheError, _, _>(&[], "hot", MINUTE, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(Value::from("rendered"))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Value::from("rendered"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(backend.in_flight.is_empty());
    }

    #[tokio::test]
    async fn untagged_key_cannot_reach_a_tagged_entry() {
        let backend = backend();
        let calls = AtomicUsize::new(0);

        remember_counting(&backend, &tags(&["home"]), "x", MINUTE, &calls, "tagged").await;
        let plain =
            remember_counting(&backend, &[], r#"["home"]:x"#, MINUTE, &calls, "plain").await;

        assert_eq!(plain, Value::from("plain"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_computation_releases_its_turn() {
        let backend = backend();

        let pending = backend.remember_in::<CacheError, _, _>(&[], "slow", MINUTE, || async {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        });
        let outcome = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(outcome.is_err());
        assert!(backend.in_flight.is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn flush_during_computation_discards_its_result() {
        let backend = backend();
        let news = tags(&["news"]);
        let (release, released) = oneshot::channel::<()>();

        let computing = backend.remember_in::<CacheError, _, _>(&news, "k", MINUTE, || async move {
            let _ = released.await;
            Ok(Value::from("stale"))
        });
        let flushing = async {
            tokio::task::yield_now().await;
            backend.flush_tags(&news).await.unwrap();
            let _ = release.send(());
        };
        let (value, ()) = tokio::join!(computing, flushing);

        assert_eq!(value.unwrap(), Value::from("stale"));
        assert!(backend.is_empty());

        let calls = AtomicUsize::new(0);
        remember_counting(&backend, &news, "k", MINUTE, &calls, "fresh").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_of_other_tags_keeps_concurrent_result() {
        let backend = backend();
        let (release, released) = oneshot::channel::<()>();

        let news = tags(&["news"]);
        let computing =
            backend.remember_in::<CacheError, _, _>(&news, "k", MINUTE, || async move {
                let _ = released.await;
                Ok(Value::from("kept"))
            });
        let flushing = async {
            tokio::task::yield_now().await;
            backend.flush_tags(&tags(&["sidebar"])).await.unwrap();
            let _ = release.send(());
        };
        let (value, ()) = tokio::join!(computing, flushing);

        assert_eq!(value.unwrap(), Value::from("kept"));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn lru_capacity_evicts_oldest_entry() {
        let backend = MemoryBackend::new(NonZeroUsize::new(2).unwrap());
        let calls = AtomicUsize::new(0);

        remember_counting(&backend, &[], "a", MINUTE, &calls, "a").await;
        remember_counting(&backend, &[], "b", MINUTE, &calls, "b").await;
        remember_counting(&backend, &[], "c", MINUTE, &calls, "c").await;
        assert_eq!(backend.len(), 2);

        remember_counting(&backend, &[], "a", MINUTE, &calls, "a").await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn tokens_round_trip_through_slots() {
        let backend = backend();
        assert_eq!(backend.load_token("slot").await.unwrap(), None);

        backend.store_token("slot", "t0").await.unwrap();
        backend.store_token("slot", "t1").await.unwrap();
        assert_eq!(backend.load_token("slot").await.unwrap(), Some("t1".to_string()));
    }

    #[tokio::test]
    async fn entries_recover_from_poisoned_lock() {
        let backend = backend();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = backend
                .shelf
                .lock()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let calls = AtomicUsize::new(0);
        remember_counting(&backend, &[], "k", MINUTE, &calls, "v").await;
        assert_eq!(backend.len(), 1);
    }
}
