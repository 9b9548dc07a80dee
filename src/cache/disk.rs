//! Disk cache tier with LRU eviction.
//!
//! Entries are stored as flat files named by a hash of the canonical key:
//!
//! ```text
//! {cache_dir}/{key_hash:016x}.img
//! ```
//!
//! The key is hashed to produce a filename that is safe on every platform
//! regardless of what characters the source URL contains. An in-memory index
//! is rebuilt by scanning the directory on startup; the URL itself is not
//! recoverable from the filename, so the index maps hashes, not keys.

use crate::cache::r#trait::{CacheTier, TierKind};
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, ImageKey};
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Target fraction of the byte cap after eviction, leaving headroom for new
/// writes before the next eviction cycle.
const EVICTION_TARGET: f64 = 0.9;

/// File extension for cached entries.
const CACHE_EXTENSION: &str = "img";

/// Stable filename hash for a cache key.
fn key_hash(key: &ImageKey) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Disk cache tier for persistent storage of encoded image bytes.
///
/// Durable across restarts. Writes are synchronous; the coordinator runs
/// them on the blocking pool so they never stall the async runtime.
pub struct DiskCache {
    /// Cache directory root
    cache_dir: PathBuf,
    /// Index of cached entries (key hash -> size in bytes)
    index: Mutex<HashMap<u64, usize>>,
    /// Maximum size in bytes
    max_size_bytes: usize,
    /// Current size in bytes
    current_size_bytes: Mutex<usize>,
    /// Statistics
    stats: Mutex<CacheStats>,
}

impl DiskCache {
    /// Create a new disk cache rooted at `cache_dir`.
    ///
    /// Scans any existing entries to rebuild the index, and evicts down to
    /// the cap if a previous session left the directory over limit.
    pub fn new(cache_dir: PathBuf, max_size_bytes: usize) -> Result<Self, CacheError> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let cache = Self {
            cache_dir,
            index: Mutex::new(HashMap::new()),
            max_size_bytes,
            current_size_bytes: Mutex::new(0),
            stats: Mutex::new(CacheStats::new()),
        };

        cache.scan_cache_dir()?;
        cache.evict_if_over_limit();

        Ok(cache)
    }

    /// Path for a key's backing file.
    fn entry_path(&self, hash: u64) -> PathBuf {
        self.cache_dir
            .join(format!("{:016x}.{}", hash, CACHE_EXTENSION))
    }

    /// Get the number of entries in the cache.
    pub fn entry_count(&self) -> usize {
        self.index.lock().unwrap().len()
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
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock().unwrap();

        for hash in index.keys() {
            let _ = fs::remove_file(self.entry_path(*hash));
        }
        index.clear();

        let mut size = self.current_size_bytes.lock().unwrap();
        *size = 0;

        if let Ok(mut stats) = self.stats.lock() {
            stats.update_size(0, 0);
        }

        Ok(())
    }

    /// Scan the cache directory to rebuild the index.
    fn scan_cache_dir(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock().unwrap();
        let mut total_size = 0;

        for entry in fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }

            let hash = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| u64::from_str_radix(s, 16).ok());

            if let (Some(hash), Ok(metadata)) = (hash, entry.metadata()) {
                let size = metadata.len() as usize;
                total_size += size;
                index.insert(hash, size);
            }
        }

        let mut size = self.current_size_bytes.lock().unwrap();
        *size = total_size;

        if let Ok(mut stats) = self.stats.lock() {
            stats.update_size(total_size, index.len());
        }

        debug!(
            entries = index.len(),
            size_bytes = total_size,
            "Disk cache index rebuilt"
        );

        Ok(())
    }

    /// Evict least recently used entries (by file mtime) until under limit.
    pub fn evict_if_over_limit(&self) {
        let current_size = self.size_bytes();
        if current_size <= self.max_size_bytes {
            return;
        }

        let target_size = (self.max_size_bytes as f64 * EVICTION_TARGET) as usize;

        // Collect entries with modification times, oldest first
        let mut entries: Vec<(u64, SystemTime, usize)> = Vec::new();
        {
            let index = self.index.lock().unwrap();
            for (hash, size) in index.iter() {
                if let Ok(metadata) = fs::metadata(self.entry_path(*hash)) {
                    if let Ok(modified) = metadata.modified() {
                        entries.push((*hash, modified, *size));
                    }
                }
            }
        }
        entries.sort_by_key(|(_, modified, _)| *modified);

        let mut evicted_count = 0;
        let mut freed_bytes = 0;

        for (hash, _, size) in entries {
            if self.size_bytes() <= target_size {
                break;
            }

            if fs::remove_file(self.entry_path(hash)).is_ok() {
                self.index.lock().unwrap().remove(&hash);

                let mut current = self.current_size_bytes.lock().unwrap();
                *current = current.saturating_sub(size);
                freed_bytes += size;
                evicted_count += 1;
            }
        }

        // Snapshot size and entry count before taking the stats lock; every
        // other path here locks index -> size -> stats, never stats first.
        let (remaining_size, remaining_entries) = {
            let index = self.index.lock().unwrap();
            let size = self.current_size_bytes.lock().unwrap();
            (*size, index.len())
        };
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_eviction(evicted_count);
            stats.update_size(remaining_size, remaining_entries);
        }

        debug!(
            evicted = evicted_count,
            freed_bytes, "Disk cache eviction complete"
        );
    }
}

impl CacheTier for DiskCache {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    fn get(&self, key: &ImageKey) -> Option<Vec<u8>> {
        let hash = key_hash(key);

        let known = self.index.lock().unwrap().contains_key(&hash);
        if known {
            match fs::read(self.entry_path(hash)) {
                Ok(data) => {
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.record_hit();
                    }
                    return Some(data);
                }
                Err(e) => {
                    // Unreadable entry counts as a miss; drop it from the index
                    warn!(key = %key, error = %e, "Disk cache entry unreadable, dropping");
                    let mut index = self.index.lock().unwrap();
                    if let Some(size) = index.remove(&hash) {
                        let mut current = self.current_size_bytes.lock().unwrap();
                        *current = current.saturating_sub(size);
                    }
                }
            }
        }

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_miss();
        }
        None
    }

    fn set(&self, key: ImageKey, data: Vec<u8>) -> Result<(), CacheError> {
        let hash = key_hash(&key);
        let path = self.entry_path(hash);
        let data_len = data.len();

        if let Err(e) = fs::write(&path, &data) {
            if let Ok(mut stats) = self.stats.lock() {
                stats.record_write_failure();
            }
            return Err(CacheError::Io(e));
        }

        let mut index = self.index.lock().unwrap();
        let mut size = self.current_size_bytes.lock().unwrap();

        if let Some(old_size) = index.insert(hash, data_len) {
            *size = size.saturating_sub(old_size);
        }
        *size += data_len;

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_write();
            stats.update_size(*size, index.len());
        }

        drop(size);
        drop(index);
        self.evict_if_over_limit();

        Ok(())
    }

    fn remove(&self, key: &ImageKey) -> Result<(), CacheError> {
        let hash = key_hash(key);

        let mut index = self.index.lock().unwrap();
        if let Some(size) = index.remove(&hash) {
            let _ = fs::remove_file(self.entry_path(hash));
            let mut current = self.current_size_bytes.lock().unwrap();
            *current = current.saturating_sub(size);

            if let Ok(mut stats) = self.stats.lock() {
                stats.update_size(*current, index.len());
            }
        }

        Ok(())
    }

    fn contains(&self, key: &ImageKey) -> bool {
        self.index.lock().unwrap().contains_key(&key_hash(key))
    }

    fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_cache() -> (DiskCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path().to_path_buf(), 10_000_000).unwrap();
        (cache, temp_dir)
    }

    fn test_key(name: &str) -> ImageKey {
        ImageKey::new(format!("https://example.com/{}.jpg", name))
    }

    #[test]
    fn test_disk_cache_new() {
        let (cache, _temp) = create_temp_cache();
        assert_eq!(cache.max_size_bytes(), 10_000_000);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_disk_cache_set_and_get() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");
        let data = vec![1, 2, 3, 4, 5];

        cache.set(key.clone(), data.clone()).unwrap();

        assert_eq!(cache.get(&key), Some(data));
    }

    #[test]
    fn test_disk_cache_miss() {
        let (cache, _temp) = create_temp_cache();
        assert_eq!(cache.get(&test_key("cat")), None);
    }

    #[test]
    fn test_disk_cache_contains() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        assert!(!cache.contains(&key));
        cache.set(key.clone(), vec![1, 2, 3]).unwrap();
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_disk_cache_remove() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        cache.set(key.clone(), vec![0u8; 1000]).unwrap();
        cache.remove(&key).unwrap();

        assert!(!cache.contains(&key));
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_disk_cache_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().to_path_buf();
        let key = test_key("cat");

        {
            let cache = DiskCache::new(cache_dir.clone(), 10_000_000).unwrap();
            cache.set(key.clone(), vec![1, 2, 3, 4, 5]).unwrap();
        }

        // New instance over the same directory sees the entry
        {
            let cache = DiskCache::new(cache_dir, 10_000_000).unwrap();
            assert_eq!(cache.entry_count(), 1);
            assert_eq!(cache.get(&key), Some(vec![1, 2, 3, 4, 5]));
        }
    }

    #[test]
    fn test_disk_cache_size_tracking() {
        let (cache, _temp) = create_temp_cache();

        cache.set(test_key("a"), vec![0u8; 1000]).unwrap();
        assert_eq!(cache.size_bytes(), 1000);

        cache.set(test_key("b"), vec![0u8; 2000]).unwrap();
        assert_eq!(cache.size_bytes(), 3000);
        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn test_disk_cache_replace_existing() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        cache.set(key.clone(), vec![0u8; 1000]).unwrap();
        cache.set(key.clone(), vec![0u8; 400]).unwrap();

        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.size_bytes(), 400);
    }

    #[test]
    fn test_disk_cache_clear() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        cache.set(key.clone(), vec![1, 2, 3]).unwrap();
        cache.clear().unwrap();

        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.size_bytes(), 0);
        assert!(!cache.contains(&key));
    }

    #[test]
    fn test_disk_cache_statistics() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        cache.set(key.clone(), vec![1, 2, 3]).unwrap();
        cache.get(&key);
        cache.get(&test_key("ghost"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_disk_cache_eviction() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path().to_path_buf(), 5_000).unwrap();
        let data = vec![0u8; 1000];

        for i in 0..8 {
            cache.set(test_key(&format!("img{}", i)), data.clone()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert!(cache.size_bytes() <= 5_000, "Cache should stay under limit");
        assert!(cache.stats().evictions > 0);
        // Most recent entry survives
        assert!(cache.contains(&test_key("img7")));
    }

    #[test]
    fn test_disk_cache_unreadable_entry_treated_as_miss() {
        let (cache, _temp) = create_temp_cache();
        let key = test_key("cat");

        cache.set(key.clone(), vec![1, 2, 3]).unwrap();

        // Delete the backing file behind the cache's back
        fs::remove_file(cache.entry_path(key_hash(&key))).unwrap();

        assert_eq!(cache.get(&key), None);
        // Entry dropped from the index after the failed read
        assert!(!cache.contains(&key));
    }

    #[test]
    fn test_key_hash_is_stable() {
        let key = test_key("cat");
        assert_eq!(key_hash(&key), key_hash(&key.clone()));
    }

    #[test]
    fn test_disk_cache_concurrent_writes_with_eviction() {
        use std::sync::mpsc;
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        // Small cap so every writer keeps the eviction path hot; a
        // watchdog channel turns a wedged writer into a test failure
        // instead of a hang.
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(temp_dir.path().to_path_buf(), 4_000).unwrap());

        let (done_tx, done_rx) = mpsc::channel();
        for writer in 0..4 {
            let cache = Arc::clone(&cache);
            let done = done_tx.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let key = test_key(&format!("w{}-{}", writer, i));
                    cache.set(key, vec![0u8; 600]).unwrap();
                }
                done.send(()).unwrap();
            });
        }
        drop(done_tx);

        for _ in 0..4 {
            done_rx
                .recv_timeout(Duration::from_secs(60))
                .expect("concurrent writers should finish");
        }

        assert!(cache.size_bytes() <= 4_000);
        assert!(cache.stats().evictions > 0);
    }
}
