//! Request coordination.
//!
//! [`RemoteImageManager`] is the entry point: it owns the ordered cache
//! tier list, the network fetcher, the decoder, and the in-flight group
//! map. Every request flows memory tier → persistent tier → network, with
//! concurrent requests for the same resource collapsed onto one fetch.
//!
//! Delivery ordering is guaranteed per receiver: zero or more progress
//! results, then exactly one terminal result. All fan-out sends happen
//! under the group-map lock, so racing tasks cannot interleave a progress
//! delivery after a terminal one.

mod group;
mod result;

pub use group::ManagerStats;
pub use result::{
    ImageResult, RequestError, RequestHandle, RequestId, RequestOptions, ResultKind,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{
    CacheConfig, CacheError, CacheStats, CacheTier, DiskCache, ImageKey, MemoryCache, TierKind,
};
use crate::decode::{DecodeError, DecodedImage, DefaultImageDecoder, ImageDecoder};
use crate::fetcher::{FetchError, Fetcher, HttpFetcher, ResponseMetadata};
use group::{InFlightGroup, Waiter};

/// Errors that can occur while constructing a manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Manager configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Cache tier configuration
    pub cache: CacheConfig,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Coordinates image retrieval across cache tiers and the network.
///
/// Cheap to clone; all clones share the same tiers, fetcher, and in-flight
/// state.
pub struct RemoteImageManager<F: Fetcher> {
    inner: Arc<ManagerInner<F>>,
}

impl<F: Fetcher> Clone for RemoteImageManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ManagerInner<F: Fetcher> {
    /// Cache tiers in priority order, fastest first
    tiers: Vec<Arc<dyn CacheTier>>,
    fetcher: F,
    decoder: Arc<dyn ImageDecoder>,
    /// In-flight fetches keyed by canonical image key
    groups: Mutex<HashMap<ImageKey, InFlightGroup>>,
    stats: Mutex<ManagerStats>,
}

impl RemoteImageManager<HttpFetcher> {
    /// Create a manager with the default memory + disk tiers and HTTP
    /// fetcher.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        let memory: Arc<dyn CacheTier> =
            Arc::new(MemoryCache::new(config.cache.memory.max_size_bytes));
        let disk: Arc<dyn CacheTier> = Arc::new(DiskCache::new(
            config.cache.disk.cache_dir.clone(),
            config.cache.disk.max_size_bytes,
        )?);
        let fetcher = HttpFetcher::new()?;

        Ok(Self::with_parts(
            vec![memory, disk],
            fetcher,
            Arc::new(DefaultImageDecoder),
        ))
    }
}

impl<F: Fetcher + 'static> RemoteImageManager<F> {
    /// Assemble a manager from explicit parts. Tiers are probed in the
    /// order given, fastest first.
    pub fn with_parts(
        tiers: Vec<Arc<dyn CacheTier>>,
        fetcher: F,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tiers,
                fetcher,
                decoder,
                groups: Mutex::new(HashMap::new()),
                stats: Mutex::new(ManagerStats::default()),
            }),
        }
    }

    /// Request the image at `url` with default options.
    pub async fn request(&self, url: &str) -> RequestHandle {
        self.request_with_options(url, RequestOptions::default())
            .await
    }

    /// Request the image at `url`.
    ///
    /// The returned handle yields zero or more progress results followed
    /// by exactly one terminal result. Concurrent requests for the same
    /// canonical URL share a single network fetch; each caller still gets
    /// its own request id and per-caller timing.
    pub async fn request_with_options(&self, url: &str, options: RequestOptions) -> RequestHandle {
        let id = RequestId::next();
        let key = ImageKey::new(url);
        let submitted = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut stats = self.inner.stats.lock().await;
            stats.total_requests += 1;
        }

        // Join an already in-flight fetch before touching the tiers.
        if self.try_join(&key, id, &tx, submitted, options.quality).await {
            return RequestHandle::new(id, rx);
        }

        if !options.ignore_cache {
            if let Some((index, tier, bytes, decoded)) = self.inner.lookup_cached(&key).await {
                {
                    let mut stats = self.inner.stats.lock().await;
                    match tier {
                        TierKind::Memory => stats.memory_hits += 1,
                        TierKind::Persistent => stats.disk_hits += 1,
                    }
                }
                debug!(key = %key, id = %id, tier = ?tier, "cache hit");

                let _ = tx.send(ImageResult::cache_hit(
                    id,
                    tier,
                    decoded,
                    submitted.elapsed(),
                    options.quality,
                ));

                // Promote into faster tiers after the caller has its result.
                if index > 0 {
                    self.inner.promote(&key, bytes, index);
                }
                return RequestHandle::new(id, rx);
            }
        }

        // Full miss. A fetch may have started while we probed the tiers,
        // so join-or-create atomically under the group lock.
        let waiter = Waiter {
            id,
            tx,
            submitted,
            quality: options.quality,
        };
        let mut groups = self.inner.groups.lock().await;
        if let Some(group) = groups.get_mut(&key) {
            {
                let mut stats = self.inner.stats.lock().await;
                stats.coalesced_requests += 1;
            }
            if let Some(progress) = group.latest_progress {
                let _ = waiter.tx.send(ImageResult::progress(
                    waiter.id,
                    progress,
                    waiter.submitted.elapsed(),
                    waiter.quality,
                ));
            }
            group.waiters.push(waiter);
        } else {
            let cancel = CancellationToken::new();
            groups.insert(key.clone(), InFlightGroup::new(waiter, cancel.clone()));
            debug!(key = %key, id = %id, "starting fetch");
            tokio::spawn(Arc::clone(&self.inner).run_fetch(key, cancel));
        }
        drop(groups);

        RequestHandle::new(id, rx)
    }

    /// Withdraw one caller's interest in its request.
    ///
    /// The caller receives nothing further. When the last waiter on a
    /// shared fetch cancels, the fetch itself is aborted and no terminal
    /// result is produced. Returns true if a waiter was removed; ids of
    /// requests that already completed return false.
    pub async fn cancel(&self, id: RequestId) -> bool {
        let mut groups = self.inner.groups.lock().await;

        let mut abandoned = None;
        let mut found = false;
        for (key, group) in groups.iter_mut() {
            if group.remove_waiter(id) {
                found = true;
                if group.waiters.is_empty() {
                    group.cancel.cancel();
                    abandoned = Some(key.clone());
                }
                break;
            }
        }

        if let Some(key) = abandoned {
            groups.remove(&key);
            debug!(key = %key, id = %id, "last waiter cancelled, aborting fetch");
        } else if found {
            debug!(id = %id, "waiter cancelled, fetch continues for remaining waiters");
        }
        drop(groups);

        if found {
            let mut stats = self.inner.stats.lock().await;
            stats.cancellations += 1;
        }
        found
    }

    /// Snapshot of coordination statistics.
    pub async fn stats(&self) -> ManagerStats {
        self.inner.stats.lock().await.clone()
    }

    /// Per-tier cache statistics, in tier priority order.
    pub fn cache_stats(&self) -> Vec<CacheStats> {
        self.inner.tiers.iter().map(|t| t.stats()).collect()
    }

    /// Number of fetches currently in flight.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.groups.lock().await.len()
    }

    /// Join an existing group for `key`, replaying the latest progress
    /// snapshot to the new waiter. Returns false if no fetch is in flight.
    async fn try_join(
        &self,
        key: &ImageKey,
        id: RequestId,
        tx: &UnboundedSender<ImageResult>,
        submitted: Instant,
        quality: f32,
    ) -> bool {
        let mut groups = self.inner.groups.lock().await;
        let Some(group) = groups.get_mut(key) else {
            return false;
        };

        {
            let mut stats = self.inner.stats.lock().await;
            stats.coalesced_requests += 1;
        }

        if let Some(progress) = group.latest_progress {
            let _ = tx.send(ImageResult::progress(id, progress, submitted.elapsed(), quality));
        }
        group.waiters.push(Waiter {
            id,
            tx: tx.clone(),
            submitted,
            quality,
        });
        debug!(
            key = %key,
            id = %id,
            waiters = group.waiters.len(),
            "coalescing into in-flight fetch"
        );
        true
    }
}

impl<F: Fetcher + 'static> ManagerInner<F> {
    /// Probe tiers in priority order, returning the first entry that
    /// decodes. A hit that fails to decode is discarded from its tier and
    /// the probe continues downward.
    async fn lookup_cached(
        &self,
        key: &ImageKey,
    ) -> Option<(usize, TierKind, Vec<u8>, DecodedImage)> {
        for (index, tier) in self.tiers.iter().enumerate() {
            let bytes = match tier.kind() {
                TierKind::Memory => tier.get(key),
                TierKind::Persistent => {
                    let tier = Arc::clone(tier);
                    let key = key.clone();
                    tokio::task::spawn_blocking(move || tier.get(&key))
                        .await
                        .ok()
                        .flatten()
                }
            };
            let Some(bytes) = bytes else { continue };

            match self.decode(bytes.clone()).await {
                Ok(decoded) => return Some((index, tier.kind(), bytes, decoded)),
                Err(error) => {
                    warn!(
                        key = %key,
                        tier = ?tier.kind(),
                        %error,
                        "corrupt cache entry, discarding"
                    );
                    if let Err(e) = tier.remove(key) {
                        warn!(key = %key, error = %e, "failed to remove corrupt entry");
                    }
                }
            }
        }
        None
    }

    /// Best-effort copy of a hit into every tier faster than where it was
    /// found. Failures are logged, never surfaced.
    fn promote(&self, key: &ImageKey, bytes: Vec<u8>, hit_index: usize) {
        for tier in self.tiers[..hit_index].iter() {
            let tier = Arc::clone(tier);
            let key = key.clone();
            let bytes = bytes.clone();
            tokio::spawn(async move {
                if let Err(e) = tier.set(key.clone(), bytes) {
                    warn!(key = %key, tier = ?tier.kind(), error = %e, "cache promotion failed");
                }
            });
        }
    }

    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage, DecodeError> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| DecodeError::Malformed(e.to_string()))?
    }

    /// Drive one network fetch for `key` and fan the outcome out to every
    /// waiter in its group.
    async fn run_fetch(self: Arc<Self>, key: ImageKey, cancel: CancellationToken) {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let url = key.as_str().to_string();

        // Pump progress ticks into the group: update the late-joiner
        // snapshot and fan out to current waiters, all under the group
        // lock. Ends when the fetch drops its sender.
        let pump = {
            let inner = Arc::clone(&self);
            let key = key.clone();
            tokio::spawn(async move {
                while let Some(progress) = progress_rx.recv().await {
                    let mut groups = inner.groups.lock().await;
                    let Some(group) = groups.get_mut(&key) else {
                        break;
                    };
                    group.latest_progress = Some(progress);
                    for waiter in &group.waiters {
                        let _ = waiter.tx.send(ImageResult::progress(
                            waiter.id,
                            progress,
                            waiter.submitted.elapsed(),
                            waiter.quality,
                        ));
                    }
                }
            })
        };

        let fetched = self.fetcher.fetch(&url, progress_tx, cancel).await;
        // All progress is delivered before any terminal result.
        let _ = pump.await;

        match fetched {
            Err(FetchError::Cancelled) => {
                debug!(key = %key, "fetch cancelled, no result delivered");
            }
            Err(error) => self.finish_with_error(&key, error.into()).await,
            Ok(fetched) => match self.decode(fetched.bytes.clone()).await {
                Err(error) => self.finish_with_error(&key, error.into()).await,
                Ok(decoded) => {
                    self.store(&key, &fetched.bytes).await;
                    self.finish_with_download(&key, decoded, fetched.metadata).await;
                }
            },
        }
    }

    /// Write confirmed bytes through every tier. Only called for payloads
    /// that decoded successfully.
    async fn store(&self, key: &ImageKey, bytes: &[u8]) {
        for tier in &self.tiers {
            let outcome = match tier.kind() {
                TierKind::Memory => tier.set(key.clone(), bytes.to_vec()),
                TierKind::Persistent => {
                    let tier = Arc::clone(tier);
                    let key = key.clone();
                    let data = bytes.to_vec();
                    match tokio::task::spawn_blocking(move || tier.set(key, data)).await {
                        Ok(result) => result,
                        Err(_) => continue,
                    }
                }
            };
            if let Err(e) = outcome {
                warn!(key = %key, tier = ?tier.kind(), error = %e, "cache write failed");
            }
        }
    }

    async fn finish_with_download(
        &self,
        key: &ImageKey,
        decoded: DecodedImage,
        metadata: ResponseMetadata,
    ) {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.remove(key) else {
            return;
        };
        {
            let mut stats = self.stats.lock().await;
            stats.downloads += 1;
        }

        debug!(key = %key, waiters = group.waiters.len(), "fetch complete");
        for waiter in &group.waiters {
            let _ = waiter.tx.send(ImageResult::download(
                waiter.id,
                decoded.clone(),
                metadata.clone(),
                waiter.submitted.elapsed(),
                waiter.quality,
            ));
        }
    }

    async fn finish_with_error(&self, key: &ImageKey, error: RequestError) {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.remove(key) else {
            return;
        };
        {
            let mut stats = self.stats.lock().await;
            stats.download_failures += 1;
        }

        warn!(key = %key, %error, waiters = group.waiters.len(), "fetch failed");
        for waiter in &group.waiters {
            let _ = waiter.tx.send(ImageResult::failure(
                waiter.id,
                error.clone(),
                waiter.submitted.elapsed(),
                waiter.quality,
            ));
        }
    }
}
