//! Keyed LRU store.
//!
//! A bounded least-recently-used map from string keys to values, with an
//! optional per-entry TTL checked lazily on access. An ordered key index is
//! kept in lockstep with the LRU so every key under a scope prefix can be
//! enumerated or purged with a range scan.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use serde::Serialize;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_HIT: &str = "folio_cache_hit_total";
const METRIC_CACHE_MISS: &str = "folio_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "folio_cache_evict_total";

/// Point-in-time counters for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Option<Duration>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.inserted_at) > ttl)
    }
}

struct Slots<V> {
    entries: LruCache<String, Entry<V>>,
    index: BTreeSet<String>,
}

impl<V> Slots<V> {
    fn remove(&mut self, key: &str) -> bool {
        self.index.remove(key);
        self.entries.pop(key).is_some()
    }

    fn prefixed(&self, prefix: &str) -> Vec<String> {
        self.index
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Drops expired keys among `keys` and returns the live remainder.
    fn retain_live(&mut self, keys: Vec<String>, now: Instant) -> Vec<String> {
        let mut live = Vec::with_capacity(keys.len());
        for key in keys {
            let expired = self
                .entries
                .peek(key.as_str())
                .is_none_or(|entry| entry.is_expired(now));
            if expired {
                self.remove(&key);
            } else {
                live.push(key);
            }
        }
        live
    }
}

/// Bounded LRU store for one cache family.
pub struct KeyedLruStore<V> {
    family: &'static str,
    slots: RwLock<Slots<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> KeyedLruStore<V> {
    /// Create a store labelled `family` holding at most `capacity` entries.
    pub fn new(family: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            family,
            slots: RwLock::new(Slots {
                entries: LruCache::new(capacity),
                index: BTreeSet::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Look up `key`, promoting it to most recently used.
    ///
    /// Expired entries are evicted here and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut slots = rw_write(&self.slots, SOURCE, "get");
        let state = slots
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

        match state {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_CACHE_HIT, "family" => self.family).increment(1);
                Some(value)
            }
            Some(None) => {
                slots.remove(key);
                self.record_miss();
                None
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Insert or replace `key`. A zero `ttl` keeps the entry until it is
    /// removed or evicted.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = Entry {
            value,
            inserted_at: Instant::now(),
            ttl: (!ttl.is_zero()).then_some(ttl),
        };

        let mut slots = rw_write(&self.slots, SOURCE, "set");
        slots.index.insert(key.clone());
        if let Some((displaced, _)) = slots.entries.push(key.clone(), entry)
            && displaced != key
        {
            slots.index.remove(&displaced);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_EVICT, "family" => self.family).increment(1);
        }
    }

    /// Remove `key`; returns whether an entry was present.
    pub fn remove(&self, key: &str) -> bool {
        rw_write(&self.slots, SOURCE, "remove").remove(key)
    }

    /// Whether a live entry exists for `key`. Does not touch recency.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut slots = rw_write(&self.slots, SOURCE, "has");
        match slots.entries.peek(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                slots.remove(key);
                false
            }
            None => false,
        }
    }

    /// Every live key starting with `prefix`, in lexicographic order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut slots = rw_write(&self.slots, SOURCE, "keys_with_prefix");
        let keys = slots.prefixed(prefix);
        slots.retain_live(keys, now)
    }

    /// Remove every key starting with `prefix`; returns the live keys removed.
    pub fn purge_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut slots = rw_write(&self.slots, SOURCE, "purge_with_prefix");
        let keys = slots.prefixed(prefix);
        let live = slots.retain_live(keys, now);
        for key in &live {
            slots.remove(key);
        }
        live
    }

    pub fn clear(&self) {
        let mut slots = rw_write(&self.slots, SOURCE, "clear");
        slots.entries.clear();
        slots.index.clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.slots, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS, "family" => self.family).increment(1);
    }
}
