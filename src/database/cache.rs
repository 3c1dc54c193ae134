use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Counts exposed by the resolver for health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: Instant,
    expires_at: Instant,
}

/// TTL cache keyed by tenant id with per-key single-flight loading.
///
/// Entries are valid while `now < expires_at` and removed lazily when a
/// lookup observes them expired. Concurrent misses for the same key collapse
/// into one loader call; misses for different keys load in parallel. Eviction
/// only drops the cache's own handle on the value, so clones held by
/// in-flight requests stay usable.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, CacheEntry<V>>>,
    inflight: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry, removing it if expired.
    pub async fn get(&self, key: Uuid) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Observed expired: take the write lock and re-check before removing
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&key) {
            if Instant::now() < entry.expires_at {
                return Some(entry.value.clone());
            }
            entries.remove(&key);
        }
        None
    }

    /// Return the cached value or run `load` to produce one, collapsing
    /// concurrent misses for the same key. The boolean is true on a cache
    /// hit (including waiters served by another caller's load). A failed
    /// load installs nothing.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: Uuid,
        load: F,
    ) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok((value, true));
        }

        let slot = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = slot.lock().await;

        // Another waiter may have completed the load while we queued
        if let Some(value) = self.get(key).await {
            return Ok((value, true));
        }

        let result = load().await;
        if let Ok(value) = &result {
            self.insert(key, value.clone()).await;
        }

        // Drop the slot; late arrivals now see the cached entry
        self.inflight.lock().await.remove(&key);

        result.map(|value| (value, false))
    }

    pub async fn insert(&self, key: Uuid, value: V) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            cached_at: now,
            expires_at: now + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Lifetime window of a present entry. Test hook.
    #[cfg(test)]
    async fn entry_window(&self, key: Uuid) -> Option<(Instant, Instant)> {
        self.entries
            .read()
            .await
            .get(&key)
            .map(|entry| (entry.cached_at, entry.expires_at))
    }

    /// Targeted eviction. Returns whether an entry was present.
    pub async fn invalidate(&self, key: Uuid) -> bool {
        self.entries.write().await.remove(&key).is_some()
    }

    /// Global eviction.
    pub async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let active = entries
            .values()
            .filter(|entry| now < entry.expires_at)
            .count();
        CacheStats {
            total: entries.len(),
            active,
            expired: entries.len() - active,
        }
    }
}
