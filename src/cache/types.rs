//! Core types for the tiered cache.

use std::path::PathBuf;
use thiserror::Error;

/// Canonical cache key derived from an image URL.
///
/// Two requests for the same resource must produce equal keys so the
/// coordinator can coalesce them. The URL fragment is stripped because it
/// never reaches the server and would otherwise split identical resources
/// into separate cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    url: String,
}

impl ImageKey {
    /// Create a canonical key from a URL string.
    pub fn new(url: impl AsRef<str>) -> Self {
        let url = url.as_ref();
        let canonical = match url.find('#') {
            Some(idx) => &url[..idx],
            None => url,
        };
        Self {
            url: canonical.to_string(),
        }
    }

    /// The canonical URL backing this key.
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Cache-related errors.
///
/// These stay internal to the cache layer: the coordinator treats any tier
/// failure as a miss and continues to the next tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid cache configuration
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

/// Memory cache tier configuration.
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Maximum memory size in bytes (default: 64 MB)
    pub max_size_bytes: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Disk cache tier configuration.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Cache directory root
    pub cache_dir: PathBuf,
    /// Maximum disk size in bytes (default: 1 GB)
    pub max_size_bytes: usize,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("remoteimage");

        Self {
            cache_dir,
            max_size_bytes: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

/// Complete cache configuration for both tiers.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Memory tier configuration
    pub memory: MemoryCacheConfig,
    /// Disk tier configuration
    pub disk: DiskCacheConfig,
}

impl CacheConfig {
    /// Create a cache configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set memory tier size in bytes.
    pub fn with_memory_size(mut self, size: usize) -> Self {
        self.memory.max_size_bytes = size;
        self
    }

    /// Set disk tier size in bytes.
    pub fn with_disk_size(mut self, size: usize) -> Self {
        self.disk.max_size_bytes = size;
        self
    }

    /// Set cache directory.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.disk.cache_dir = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key_creation() {
        let key = ImageKey::new("https://example.com/cat.jpg");
        assert_eq!(key.as_str(), "https://example.com/cat.jpg");
    }

    #[test]
    fn test_image_key_strips_fragment() {
        let key = ImageKey::new("https://example.com/cat.jpg#section");
        assert_eq!(key.as_str(), "https://example.com/cat.jpg");
    }

    #[test]
    fn test_image_key_equality() {
        let key1 = ImageKey::new("https://example.com/cat.jpg");
        let key2 = ImageKey::new("https://example.com/cat.jpg#preview");
        let key3 = ImageKey::new("https://example.com/dog.jpg");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_image_key_query_preserved() {
        // Query strings reach the server, so they stay part of the key
        let key1 = ImageKey::new("https://example.com/cat.jpg?size=large");
        let key2 = ImageKey::new("https://example.com/cat.jpg?size=small");

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_image_key_display() {
        let key = ImageKey::new("https://example.com/cat.jpg");
        assert_eq!(format!("{}", key), "https://example.com/cat.jpg");
    }

    #[test]
    fn test_memory_cache_config_default() {
        let config = MemoryCacheConfig::default();
        assert_eq!(config.max_size_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_disk_cache_config_default() {
        let config = DiskCacheConfig::default();
        assert_eq!(config.max_size_bytes, 1024 * 1024 * 1024);
        assert!(config.cache_dir.ends_with("remoteimage"));
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_memory_size(1_000_000)
            .with_disk_size(10_000_000)
            .with_cache_dir(PathBuf::from("/tmp/cache"));

        assert_eq!(config.memory.max_size_bytes, 1_000_000);
        assert_eq!(config.disk.max_size_bytes, 10_000_000);
        assert_eq!(config.disk.cache_dir, PathBuf::from("/tmp/cache"));
    }
}
