//! Bounded LRU cache with per-entry TTL
//!
//! One instance per source, keyed by lookup key. Capacity is a hard bound:
//! inserting into a full cache evicts the least-recently-used entry first.
//! Expired entries are never returned; they are dropped when read and
//! counted as a miss.
//!
//! Time comes from `tokio::time::Instant` so tests can drive expiry with a
//! paused clock.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Cached value with bookkeeping
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    /// Recency tick; larger is more recent
    last_used: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Recency tick → key, oldest first
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl<V> CacheState<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_used);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, key)) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Missing,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Maximum entries
    pub capacity: usize,
    /// Current entries (expired entries not yet read may still be counted)
    pub size: usize,
    /// Reads served from cache
    pub hits: u64,
    /// Reads not served (absent or expired)
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    /// Entries dropped because their TTL passed
    pub expirations: u64,
}

impl CacheStats {
    /// hits / (hits + misses), 0 when unused
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, TTL-aware, least-recently-used cache
pub struct BoundedCache<V> {
    capacity: usize,
    state: Mutex<CacheState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> BoundedCache<V> {
    /// Create an empty cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        // A panic while holding the lock leaves the maps consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh value for `key`, marking it most recently used
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let lookup = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.entries.get(key).map(|entry| entry.is_expired(now)) {
                None => Lookup::Missing,
                Some(true) => {
                    state.remove(key);
                    Lookup::Expired
                }
                Some(false) => {
                    let tick = state.next_tick();
                    match state.entries.get_mut(key) {
                        Some(entry) => {
                            state.recency.remove(&entry.last_used);
                            entry.last_used = tick;
                            state.recency.insert(tick, key.to_string());
                            Lookup::Hit(entry.value.clone())
                        }
                        None => Lookup::Missing,
                    }
                }
            }
        };

        match lookup {
            Lookup::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Lookup::Expired => {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Missing => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl`, evicting the LRU entry when full
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        let mut evicted = 0u64;

        if state.remove(key).is_none() {
            while state.entries.len() >= self.capacity {
                if !state.evict_lru() {
                    break;
                }
                evicted += 1;
            }
        }

        let tick = state.next_tick();
        state.recency.insert(tick, key.to_string());
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                last_used: tick,
            },
        );
        drop(state);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            size: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_get_after_put() {
        let cache = BoundedCache::new(4);
        cache.put("a.com", 1, HOUR);
        assert_eq!(cache.get("a.com"), Some(1));
        assert_eq!(cache.get("b.com"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_least_recently_used() {
        let cache = BoundedCache::new(2);
        cache.put("a", 1, HOUR);
        cache.put("b", 2, HOUR);
        // Touch "a" so "b" becomes the LRU entry
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3, HOUR);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_does_not_evict() {
        let cache = BoundedCache::new(2);
        cache.put("a", 1, HOUR);
        cache.put("b", 2, HOUR);
        cache.put("a", 10, HOUR);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_miss_and_removed() {
        let cache = BoundedCache::new(4);
        cache.put("a", 1, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a"), None);

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_never_exceeds_capacity() {
        let cache = BoundedCache::new(5);
        for i in 0..50 {
            cache.put(&format!("key-{}", i), i, HOUR);
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.stats().evictions, 45);
        // Most recent five survive
        for i in 45..50 {
            assert_eq!(cache.get(&format!("key-{}", i)), Some(i));
        }
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
