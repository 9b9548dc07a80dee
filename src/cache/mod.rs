//! Tiered cache for encoded image bytes.
//!
//! Provides memory and disk tiers behind a uniform [`CacheTier`] contract,
//! with LRU eviction and per-tier statistics. The request coordinator probes
//! tiers in priority order and promotes hits into faster tiers.

mod disk;
mod memory;
mod stats;
mod r#trait;
mod types;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use r#trait::{CacheTier, NoOpCacheTier, TierKind};
pub use stats::CacheStats;
pub use types::{CacheConfig, CacheError, DiskCacheConfig, ImageKey, MemoryCacheConfig};
