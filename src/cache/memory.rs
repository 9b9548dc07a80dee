//! In-memory cache tier with LRU eviction.

use crate::cache::r#trait::{CacheTier, TierKind};
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, ImageKey};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Entry in the memory cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Cached encoded image bytes
    data: Vec<u8>,
    /// Last access time for LRU eviction
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            last_accessed: Instant::now(),
        }
    }

    /// Update access time.
    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// In-memory cache tier for encoded image bytes.
///
/// Provides fast access to recently used images with LRU eviction when the
/// byte cap is exceeded. Process-lifetime only; cleared on restart.
pub struct MemoryCache {
    /// Cache storage
    cache: Mutex<HashMap<ImageKey, CacheEntry>>,
    /// Maximum size in bytes
    max_size_bytes: usize,
    /// Current size in bytes
    current_size_bytes: Mutex<usize>,
    /// Statistics
    stats: Mutex<CacheStats>,
}

impl MemoryCache {
    /// Create a new memory cache with the given size limit.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            max_size_bytes,
            current_size_bytes: Mutex::new(0),
            stats: Mutex::new(CacheStats::new()),
        }
    }

    /// Get the current number of entries in the cache.
    pub fn entry_count(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Get the current size of the cache in bytes.
    pub fn size_bytes(&self) -> usize {
        *self.current_size_bytes.lock().unwrap()
    }

    /// Get the maximum size of the cache in bytes.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().unwrap();
        cache.clear();

        let mut size = self.current_size_bytes.lock().unwrap();
        *size = 0;

        if let Ok(mut stats) = self.stats.lock() {
            stats.update_size(0, 0);
        }
    }

    /// Evict least recently used entries until `required_size` bytes fit.
    fn evict_lru_until_size(&self, required_size: usize) {
        let mut cache = self.cache.lock().unwrap();
        let mut current_size = self.current_size_bytes.lock().unwrap();

        let target_size = if *current_size + required_size > self.max_size_bytes {
            self.max_size_bytes.saturating_sub(required_size)
        } else {
            return;
        };

        // Collect entries sorted by last access time (oldest first)
        let mut entries: Vec<(ImageKey, Instant, usize)> = cache
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed, v.data.len()))
            .collect();

        entries.sort_by_key(|(_, accessed, _)| *accessed);

        let mut evicted_count = 0;
        for (key, _, size) in entries {
            if *current_size <= target_size {
                break;
            }

            cache.remove(&key);
            *current_size = current_size.saturating_sub(size);
            evicted_count += 1;
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_eviction(evicted_count);
            stats.update_size(*current_size, cache.len());
        }
    }
}

impl CacheTier for MemoryCache {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn get(&self, key: &ImageKey) -> Option<Vec<u8>> {
        let mut cache = self.cache.lock().unwrap();

        if let Some(entry) = cache.get_mut(key) {
            entry.touch();

            if let Ok(mut stats) = self.stats.lock() {
                stats.record_hit();
            }

            Some(entry.data.clone())
        } else {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_miss();
            }

            None
        }
    }

    fn set(&self, key: ImageKey, data: Vec<u8>) -> Result<(), CacheError> {
        let data_size = data.len();

        // A payload that can never fit would only flush the tier and then
        // sit over the cap; skip it.
        if data_size > self.max_size_bytes {
            debug!(key = %key, size = data_size, "payload exceeds memory cache cap, not caching");
            return Ok(());
        }

        // Evict first if this entry would push us over the cap
        {
            let current_size = self.current_size_bytes.lock().unwrap();
            if *current_size + data_size > self.max_size_bytes {
                drop(current_size);
                self.evict_lru_until_size(data_size);
            }
        }

        let mut cache = self.cache.lock().unwrap();
        let mut current_size = self.current_size_bytes.lock().unwrap();

        // Replacing an existing entry must not double-count its bytes
        if let Some(old) = cache.insert(key, CacheEntry::new(data)) {
            *current_size = current_size.saturating_sub(old.data.len());
        }
        *current_size += data_size;

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_write();
            stats.update_size(*current_size, cache.len());
        }

        Ok(())
    }

    fn remove(&self, key: &ImageKey) -> Result<(), CacheError> {
        let mut cache = self.cache.lock().unwrap();
        let mut current_size = self.current_size_bytes.lock().unwrap();

        if let Some(entry) = cache.remove(key) {
            *current_size = current_size.saturating_sub(entry.data.len());
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.update_size(*current_size, cache.len());
        }

        Ok(())
    }

    fn contains(&self, key: &ImageKey) -> bool {
        self.cache.lock().unwrap().contains_key(key)
    }

    fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }
}
