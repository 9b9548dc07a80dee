//! Cache tier trait definition for dependency injection.

use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheError, ImageKey};

/// Which kind of storage backs a tier.
///
/// The coordinator uses this to map a hit to its provenance and to decide
/// whether a read can run inline or belongs on the blocking pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    /// Volatile in-process storage, cleared on restart. Reads are cheap.
    Memory,
    /// Durable storage surviving restarts. Reads may touch the filesystem.
    Persistent,
}

/// Cache tier abstraction over encoded image bytes.
///
/// The coordinator holds an ordered list of `Arc<dyn CacheTier>` and probes
/// them in priority order, so heterogeneous tiers (memory, disk, no-op) are
/// interchangeable. Implementations must be safe for concurrent use.
///
/// Read failures are absorbed inside the tier: `get` returns `None` for both
/// a genuine miss and an unreadable entry, logging the latter. The lookup
/// then falls through to the next tier or the network.
pub trait CacheTier: Send + Sync {
    /// The storage kind backing this tier.
    fn kind(&self) -> TierKind;

    /// Get cached bytes for the given key, or `None` on miss.
    fn get(&self, key: &ImageKey) -> Option<Vec<u8>>;

    /// Store bytes in the tier, evicting silently if over capacity.
    fn set(&self, key: ImageKey, data: Vec<u8>) -> Result<(), CacheError>;

    /// Remove an entry. Removing an absent key is not an error.
    fn remove(&self, key: &ImageKey) -> Result<(), CacheError>;

    /// Check if a key exists in the tier.
    fn contains(&self, key: &ImageKey) -> bool;

    /// Get tier statistics.
    fn stats(&self) -> CacheStats;
}

/// Tier that never caches.
///
/// Always misses. Useful for running the coordinator with caching disabled
/// and for isolating fetch behavior in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCacheTier;

impl NoOpCacheTier {
    /// Create a new no-op tier.
    pub fn new() -> Self {
        Self
    }
}

impl CacheTier for NoOpCacheTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn get(&self, _key: &ImageKey) -> Option<Vec<u8>> {
        None
    }

    fn set(&self, _key: ImageKey, _data: Vec<u8>) -> Result<(), CacheError> {
        Ok(())
    }

    fn remove(&self, _key: &ImageKey) -> Result<(), CacheError> {
        Ok(())
    }

    fn contains(&self, _key: &ImageKey) -> bool {
        false
    }

    fn stats(&self) -> CacheStats {
        CacheStats::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> ImageKey {
        ImageKey::new("https://example.com/cat.jpg")
    }

    #[test]
    fn test_noop_always_misses() {
        let tier = NoOpCacheTier::new();
        assert_eq!(tier.get(&test_key()), None);
    }

    #[test]
    fn test_noop_set_succeeds_but_does_not_store() {
        let tier = NoOpCacheTier::new();
        tier.set(test_key(), vec![1, 2, 3]).unwrap();

        assert_eq!(tier.get(&test_key()), None);
        assert!(!tier.contains(&test_key()));
    }

    #[test]
    fn test_noop_remove_succeeds() {
        let tier = NoOpCacheTier::new();
        assert!(tier.remove(&test_key()).is_ok());
    }

    #[test]
    fn test_tier_is_object_safe() {
        let tier: Box<dyn CacheTier> = Box::new(NoOpCacheTier::new());
        assert_eq!(tier.kind(), TierKind::Memory);
        assert_eq!(tier.get(&test_key()), None);
    }

    #[test]
    fn test_noop_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoOpCacheTier>();
    }
}
