//! remoteimage - Tiered-cache remote image loading
//!
//! This library retrieves images identified by URL through a tiered cache
//! (in-memory, then on-disk) with network fetch fallback. Concurrent
//! requests for the same resource share a single download, with progress
//! streamed to every waiter, and every delivered result is tagged with its
//! provenance (memory cache, disk cache, or download) and per-caller
//! timing.
//!
//! # High-Level API
//!
//! ```ignore
//! use remoteimage::manager::{ManagerConfig, RemoteImageManager, ResultKind};
//!
//! let manager = RemoteImageManager::new(ManagerConfig::default())?;
//!
//! let mut handle = manager.request("https://example.com/cat.png").await;
//! while let Some(result) = handle.recv().await {
//!     match result.kind {
//!         ResultKind::Progress => { /* update a progress bar */ }
//!         _ => { /* terminal: image, cache hit, or error */ }
//!     }
//! }
//! ```

pub mod cache;
pub mod decode;
pub mod fetcher;
pub mod logging;
pub mod manager;

pub use manager::{
    ImageResult, ManagerConfig, RemoteImageManager, RequestError, RequestHandle, RequestId,
    RequestOptions, ResultKind,
};

/// Version of the remoteimage library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
