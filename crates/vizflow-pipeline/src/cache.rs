//! Least-recently-used cache of produced data keyed by request signature.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use vizflow_core::TimeStamp;

use crate::data::DataObject;
use crate::extent::Extent;
use crate::information::UpdateRequest;

/// Identifies the request a cached object answers.
///
/// Time is keyed by its bit pattern so requests compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub extent: Extent,
    pub time_bits: Option<u64>,
    pub piece: u32,
    pub number_of_pieces: u32,
    pub ghost_levels: u32,
}

impl CacheKey {
    /// Builds the key for `request` once its extent has been resolved.
    pub fn new(extent: Extent, request: &UpdateRequest) -> Self {
        Self {
            extent,
            time_bits: request.time.map(f64::to_bits),
            piece: request.piece,
            number_of_pieces: request.number_of_pieces,
            ghost_levels: request.ghost_levels,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    data: Arc<DataObject>,
    produced: TimeStamp,
}

/// A bounded map from request signatures to produced data.
///
/// Inserting beyond capacity evicts the least recently used entry.
#[derive(Debug)]
pub struct ExtentCache {
    capacity: usize,
    entries: LruCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// `LruCache` cannot be empty; a zero capacity keeps one slot that is never filled.
fn slots(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl ExtentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: LruCache::new(slots(capacity)),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Changes the capacity, evicting least recently used entries as needed.
    pub fn set_cache_size(&mut self, capacity: usize) {
        self.capacity = capacity;
        let before = self.entries.len();
        if capacity == 0 {
            self.entries.clear();
        }
        self.entries.resize(slots(capacity));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            self.evictions += evicted as u64;
            log::debug!("cache shrank to {capacity}, evicting {evicted} entries");
        }
    }

    pub fn cache_size(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Looks up `key`, marking the entry as most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<DataObject>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                Some(Arc::clone(&entry.data))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores `data` under `key`, produced at `produced`.
    pub fn insert(&mut self, key: CacheKey, data: Arc<DataObject>, produced: TimeStamp) {
        if self.capacity == 0 {
            return;
        }
        if let Some((evicted, _)) = self.entries.push(key, CacheEntry { data, produced }) {
            if evicted != key {
                self.evictions += 1;
                log::debug!("cache evicted extent {}", evicted.extent);
            }
        }
    }

    /// Drops entries produced before `time`. Returns how many were removed.
    pub fn purge_older_than(&mut self, time: TimeStamp) -> usize {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.produced < time)
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        stale.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
