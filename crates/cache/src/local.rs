//! In-process, lock-free cache backed by `DashMap`. Generalized from the
//! teacher's Redis-fronting `LocalCache<UserProfile>` into a generic L1
//! layer usable for any keyed, TTL-bounded value — here, the Catalog's
//! eligibility queries (§A.3 `StoreConfig`: no durable L2 backend, only the
//! in-memory stores, so this cache fronts in-process reads rather than a
//! network round trip).

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

/// Lock-free TTL cache. Returns `Arc<V>` so a hit never clones the value.
pub struct LocalCache<K, V> {
    store: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            store: DashMap::with_capacity(max_entries.min(1024)),
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }

    /// Returns the cached value for `key`, or `None` if missing or expired.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entry = self.store.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(Arc::clone(&entry.value))
    }

    pub fn put(&self, key: K, value: V) {
        self.put_arc(key, Arc::new(value));
    }

    pub fn put_arc(&self, key: K, value: Arc<V>) {
        if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
            self.evict_one_expired();
            if self.store.len() >= self.max_entries {
                return;
            }
        }
        self.store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.store.remove(key);
    }

    fn evict_one_expired(&self) {
        let mut to_remove = None;
        for entry in self.store.iter() {
            if entry.value().inserted_at.elapsed() > self.ttl {
                to_remove = Some(entry.key().clone());
                break;
            }
        }
        if let Some(key) = to_remove {
            self.store.remove(&key);
        }
    }

    /// Removes every expired entry. Call periodically from a background
    /// maintenance task.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
