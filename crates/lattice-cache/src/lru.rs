//! LRU cache with per-entry TTL.
//!
//! The recency list is threaded through a slab of entries using `usize`
//! links, with a free list for slot reuse. All operations are O(1) except
//! growth of the backing slab. Expiry is lazy: an expired entry is dropped
//! the next time it is looked up or when it reaches the eviction end of
//! the list.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::stats::CacheStats;

/// Sentinel slab index for "no link".
const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    expires_at: Option<Instant>,
    prev: usize,
    next: usize,
}

/// A size-bounded LRU cache with optional per-entry TTL.
///
/// Entries inserted with `ttl: None` live until evicted by capacity
/// pressure; entries with a TTL additionally expire on their deadline.
///
/// # Example
///
/// ```rust
/// use lattice_cache::TtlLruCache;
/// use std::time::Duration;
///
/// let mut cache = TtlLruCache::new(2);
/// cache.insert(1, "one", None);
/// cache.insert(2, "two", Some(Duration::from_secs(30)));
/// cache.insert(3, "three", None); // evicts the least recently used
/// assert_eq!(cache.len(), 2);
/// ```
pub struct TtlLruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used entry.
    head: usize,
    /// Least recently used entry; eviction candidate.
    tail: usize,
    stats: Arc<CacheStats>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Inserts a value, returning the previous value for the key if any.
    ///
    /// `ttl: None` means the entry never expires on its own. Inserting over
    /// an existing key replaces both value and TTL and marks the entry
    /// most recently used.
    pub fn insert(&mut self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        if let Some(&idx) = self.map.get(&key) {
            let entry = self.entry_mut(idx);
            let old = std::mem::replace(&mut entry.value, value);
            entry.expires_at = expires_at;
            self.touch(idx);
            self.stats.record_insert();
            return Some(old);
        }
        if self.map.len() >= self.capacity {
            self.evict_lru();
        }
        let idx = self.alloc(Entry {
            key: key.clone(),
            value,
            expires_at,
            prev: NIL,
            next: NIL,
        });
        self.attach_front(idx);
        self.map.insert(key, idx);
        self.stats.record_insert();
        None
    }

    /// Looks up a value, promoting it to most recently used.
    ///
    /// Expired entries are dropped and reported as misses.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let Some(&idx) = self.map.get(key) else {
            self.stats.record_miss();
            return None;
        };
        if self.is_expired(idx) {
            self.remove_index(idx);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }
        self.touch(idx);
        self.stats.record_hit();
        Some(self.entry(idx).value.clone())
    }

    /// Looks up a value without updating recency or statistics.
    pub fn peek(&self, key: &K) -> Option<V> {
        let &idx = self.map.get(key)?;
        if self.is_expired(idx) {
            return None;
        }
        Some(self.entry(idx).value.clone())
    }

    /// Removes an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let &idx = self.map.get(key)?;
        let value = self.remove_index(idx);
        self.stats.record_removal();
        Some(value)
    }

    /// Number of resident entries, counting not-yet-reaped expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn stats_handle(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    fn entry(&self, idx: usize) -> &Entry<K, V> {
        self.slots[idx].as_ref().expect("linked cache slot occupied")
    }

    fn entry_mut(&mut self, idx: usize) -> &mut Entry<K, V> {
        self.slots[idx].as_mut().expect("linked cache slot occupied")
    }

    fn is_expired(&self, idx: usize) -> bool {
        self.entry(idx)
            .expires_at
            .map_or(false, |at| Instant::now() >= at)
    }

    fn alloc(&mut self, entry: Entry<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(entry);
            idx
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let e = self.entry(idx);
            (e.prev, e.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.entry_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.entry_mut(next).prev = prev;
        }
        let e = self.entry_mut(idx);
        e.prev = NIL;
        e.next = NIL;
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let e = self.entry_mut(idx);
            e.prev = NIL;
            e.next = old_head;
        }
        if old_head != NIL {
            self.entry_mut(old_head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn remove_index(&mut self, idx: usize) -> V {
        self.detach(idx);
        let entry = self.slots[idx].take().expect("linked cache slot occupied");
        self.map.remove(&entry.key);
        self.free.push(idx);
        entry.value
    }

    fn evict_lru(&mut self) {
        if self.tail == NIL {
            return;
        }
        let idx = self.tail;
        let expired = self.is_expired(idx);
        self.remove_index(idx);
        if expired {
            self.stats.record_expiration();
        } else {
            self.stats.record_eviction();
        }
    }
}

impl<K: Hash + Eq + Clone, V: Clone> std::fmt::Debug for TtlLruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlLruCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Thread-safe wrapper around [`TtlLruCache`].
///
/// Lookups return clones, so values are typically `Arc`s. Statistics are
/// shared out of the lock and can be read without contention.
pub struct SyncTtlCache<K, V> {
    inner: Mutex<TtlLruCache<K, V>>,
    stats: Arc<CacheStats>,
}

impl<K: Hash + Eq + Clone, V: Clone> SyncTtlCache<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let inner = TtlLruCache::new(capacity);
        let stats = inner.stats_handle();
        Self {
            inner: Mutex::new(inner),
            stats,
        }
    }

    /// Inserts a value, returning the previous value for the key if any.
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        self.inner.lock().insert(key, value, ttl)
    }

    /// Looks up a value, promoting it to most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key)
    }

    /// Looks up a value without updating recency or statistics.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().peek(key)
    }

    /// Removes an entry, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<K: Hash + Eq + Clone, V: Clone> std::fmt::Debug for SyncTtlCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTtlCache")
            .field("len", &self.len())
            .finish()
    }
}
