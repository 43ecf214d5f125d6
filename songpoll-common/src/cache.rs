//! Time-boxed, size-bounded memoization
//!
//! Entries live for a fixed TTL measured from insertion. When the cache is
//! full the oldest *inserted* entry is evicted (FIFO); reads never change
//! eviction order. An expired entry found during lookup is dropped before
//! the value is recomputed.
//!
//! `SharedCache` wraps the cache in an async mutex that stays locked across
//! the compute future, so a key is computed at most once per TTL window even
//! under concurrent requests. The lock is shared by every key: while one miss
//! is computing, lookups of other keys and `stats` wait for it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Source of "now" for expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Cache key: normalized voter identifier and dataset year
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub identifier: String,
    pub year: u16,
}

impl CacheKey {
    pub fn new(identifier: &str, year: u16) -> Self {
        Self {
            identifier: identifier.trim().to_lowercase(),
            year,
        }
    }
}

/// Hit/miss counters and occupancy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// TTL + FIFO cache
pub struct TtlCache<K, V, C = SystemClock> {
    entries: HashMap<K, Entry<V>>,
    order: VecDeque<K>,
    ttl: Duration,
    max_size: usize,
    clock: C,
    hits: u64,
    misses: u64,
}

impl<K, V> TtlCache<K, V, SystemClock>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self::with_clock(ttl, max_size, SystemClock)
    }
}

impl<K, V, C> TtlCache<K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: Clock,
{
    /// Capacity is at least one entry
    pub fn with_clock(ttl: Duration, max_size: usize, clock: C) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_size: max_size.max(1),
            clock,
            hits: 0,
            misses: 0,
        }
    }

    fn is_fresh(&self, entry: &Entry<V>) -> bool {
        self.clock.now().saturating_duration_since(entry.inserted_at) < self.ttl
    }

    fn remove(&mut self, key: &K) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Fresh value for `key`, counting a hit or a miss
    pub fn get(&mut self, key: &K) -> Option<V> {
        let fresh = match self.entries.get(key) {
            Some(entry) if self.is_fresh(entry) => Some(entry.value.clone()),
            Some(_) => {
                self.remove(key);
                None
            }
            None => None,
        };
        match fresh {
            Some(value) => {
                self.hits += 1;
                Some(value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Fresh value for `key` without touching the statistics
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| &entry.value)
    }

    /// Store a value; a refreshed key moves to the back of the eviction queue
    pub fn insert(&mut self, key: K, value: V) {
        self.remove(&key);
        while self.entries.len() >= self.max_size {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    debug!("Evicted oldest cache entry");
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: self.clock.now(),
            },
        );
    }

    pub fn get_or_insert_with(&mut self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Like `get_or_insert_with`; errors are returned and never cached
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Drop one entry, or every entry when `key` is `None`
    ///
    /// Returns the number of entries removed. Statistics are kept.
    pub fn invalidate(&mut self, key: Option<&K>) -> usize {
        match key {
            Some(key) => usize::from(self.remove(key)),
            None => {
                let removed = self.entries.len();
                self.entries.clear();
                self.order.clear();
                removed
            }
        }
    }

    /// Drop every entry and reset statistics
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            max_size: self.max_size,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}

/// `TtlCache` behind an async mutex
///
/// One lock covers all keys, so a slow miss delays every other caller
/// until its compute future resolves.
pub struct SharedCache<K, V, C = SystemClock> {
    inner: Mutex<TtlCache<K, V, C>>,
}

impl<K, V> SharedCache<K, V, SystemClock>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self::from_cache(TtlCache::new(ttl, max_size))
    }
}

impl<K, V, C> SharedCache<K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: Clock,
{
    pub fn from_cache(cache: TtlCache<K, V, C>) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }

    /// Return the cached value or run `compute` while holding the lock
    ///
    /// Callers for any key queue behind a pending compute.
    pub async fn get_or_try_insert_with<E, F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut cache = self.inner.lock().await;
        if let Some(value) = cache.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        cache.insert(key, value.clone());
        Ok(value)
    }

    pub async fn invalidate(&self, key: Option<&K>) -> usize {
        self.inner.lock().await.invalidate(key)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }
}
