//! Per-key turn-taking for backend computations.
//!
//! Callers missing the same key queue on one async mutex, so only the first
//! computes and the rest find its stored result. A key's mutex leaves the map
//! once its last holder is gone, including holders whose future was dropped
//! mid-computation.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

type Turn = Arc<AsyncMutex<()>>;

pub(crate) struct FlightMap<K: Hash + Eq> {
    turns: DashMap<K, Turn>,
}

impl<K: Hash + Eq + Clone> FlightMap<K> {
    pub(crate) fn new() -> Self {
        Self {
            turns: DashMap::new(),
        }
    }

    /// Join the queue for `key`. Await [`Flight::turn`] before computing.
    pub(crate) fn join(&self, key: K) -> Flight<'_, K> {
        // Cloning under the shard lock keeps the strong count exact for `Drop`.
        let turn = self.turns.entry(key.clone()).or_default().clone();
        Flight {
            turns: &self.turns,
            key,
            turn,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub(crate) struct Flight<'a, K: Hash + Eq> {
    turns: &'a DashMap<K, Turn>,
    key: K,
    turn: Turn,
}

impl<K: Hash + Eq> Flight<'_, K> {
    pub(crate) async fn turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }
}

impl<K: Hash + Eq> Drop for Flight<'_, K> {
    fn drop(&mut self) {
        // The map and this flight hold the last two references.
        self.turns
            .remove_if(&self.key, |_, turn| Arc::strong_count(turn) == 2);
    }
}
