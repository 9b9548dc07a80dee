//! Result types delivered to callers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::cache::TierKind;
use crate::decode::{AnimatedImage, DecodeError, DecodedImage};
use crate::fetcher::{FetchError, FetchProgress, ResponseMetadata};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque per-caller token identifying one request submission.
///
/// Two callers asking for the same URL get distinct ids even when their
/// work is served by a single shared fetch. The id is the handle for
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate the next id. Process-unique, monotonically increasing.
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Provenance of a delivered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Terminal failure, no image data
    None,
    /// Served from the in-memory tier
    MemoryCache,
    /// Served from the persistent tier
    DiskCache,
    /// Served by a network fetch
    Download,
    /// Intermediate progress delivery
    Progress,
}

impl ResultKind {
    /// True for results that came from a cache tier.
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, ResultKind::MemoryCache | ResultKind::DiskCache)
    }

    /// True for results that end delivery for their request.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultKind::Progress)
    }

    pub(crate) fn from_tier(kind: TierKind) -> Self {
        match kind {
            TierKind::Memory => ResultKind::MemoryCache,
            TierKind::Persistent => ResultKind::DiskCache,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::None => "none",
            ResultKind::MemoryCache => "memory-cache",
            ResultKind::DiskCache => "disk-cache",
            ResultKind::Download => "download",
            ResultKind::Progress => "progress",
        };
        write!(f, "{}", name)
    }
}

/// Terminal request failure.
///
/// Cloneable so one failure fans out to every waiter on a shared fetch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// One delivery to one caller: a progress snapshot, a cached or downloaded
/// image, or a terminal error.
///
/// `request_duration` is measured from the owning caller's submission, so
/// two callers sharing a fetch see different durations.
#[derive(Debug, Clone)]
pub struct ImageResult {
    /// Where this result came from
    pub kind: ResultKind,
    /// The caller this delivery belongs to
    pub request_id: RequestId,
    /// Decoded still image (first frame for animations)
    pub image: Option<Arc<DynamicImage>>,
    /// Animated payload, when the source is animated
    pub animated_image: Option<Arc<AnimatedImage>>,
    /// Terminal error, exclusive with image data
    pub error: Option<RequestError>,
    /// Transport metadata, present only for downloads
    pub response: Option<ResponseMetadata>,
    /// Download snapshot carried by progress results
    pub progress: Option<FetchProgress>,
    /// Elapsed time since this caller submitted its request
    pub request_duration: Duration,
    /// Quality tag in [0, 1] propagated from the request options
    pub rendered_image_quality: f32,
}

impl ImageResult {
    /// True when this result ends delivery for its request.
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// True for a terminal result carrying image data.
    pub fn is_success(&self) -> bool {
        self.is_terminal() && self.error.is_none() && self.image.is_some()
    }

    pub(crate) fn progress(
        request_id: RequestId,
        progress: FetchProgress,
        request_duration: Duration,
        quality: f32,
    ) -> Self {
        Self {
            kind: ResultKind::Progress,
            request_id,
            image: None,
            animated_image: None,
            error: None,
            response: None,
            progress: Some(progress),
            request_duration,
            rendered_image_quality: quality,
        }
    }

    pub(crate) fn cache_hit(
        request_id: RequestId,
        tier: TierKind,
        decoded: DecodedImage,
        request_duration: Duration,
        quality: f32,
    ) -> Self {
        Self {
            kind: ResultKind::from_tier(tier),
            request_id,
            image: decoded.image,
            animated_image: decoded.animated,
            error: None,
            response: None,
            progress: None,
            request_duration,
            rendered_image_quality: quality,
        }
    }

    pub(crate) fn download(
        request_id: RequestId,
        decoded: DecodedImage,
        response: ResponseMetadata,
        request_duration: Duration,
        quality: f32,
    ) -> Self {
        Self {
            kind: ResultKind::Download,
            request_id,
            image: decoded.image,
            animated_image: decoded.animated,
            error: None,
            response: Some(response),
            progress: None,
            request_duration,
            rendered_image_quality: quality,
        }
    }

    pub(crate) fn failure(
        request_id: RequestId,
        error: RequestError,
        request_duration: Duration,
        quality: f32,
    ) -> Self {
        Self {
            kind: ResultKind::None,
            request_id,
            image: None,
            animated_image: None,
            error: Some(error),
            response: None,
            progress: None,
            request_duration,
            rendered_image_quality: quality,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    /// Skip tier lookup and force a network fetch
    pub ignore_cache: bool,
    /// Quality tag propagated into delivered results
    pub quality: f32,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            ignore_cache: false,
            quality: 1.0,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypass cache tiers for this request.
    pub fn with_ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// Set the quality tag, clamped to [0, 1].
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality.clamp(0.0, 1.0);
        self
    }
}

/// Caller-side handle for one submitted request.
///
/// Results arrive in order: zero or more progress deliveries followed by
/// exactly one terminal result, after which the stream ends. A cancelled
/// request's stream ends with no terminal result.
pub struct RequestHandle {
    id: RequestId,
    receiver: UnboundedReceiver<ImageResult>,
}

impl RequestHandle {
    pub(crate) fn new(id: RequestId, receiver: UnboundedReceiver<ImageResult>) -> Self {
        Self { id, receiver }
    }

    /// The id to pass to `cancel`.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Receive the next delivery, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<ImageResult> {
        self.receiver.recv().await
    }

    /// Drain deliveries until the terminal result, discarding progress.
    ///
    /// Returns `None` if the request was cancelled before completing.
    pub async fn final_result(&mut self) -> Option<ImageResult> {
        while let Some(result) = self.receiver.recv().await {
            if result.is_terminal() {
                return Some(result);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_result_kind_classification() {
        assert!(ResultKind::MemoryCache.is_cache_hit());
        assert!(ResultKind::DiskCache.is_cache_hit());
        assert!(!ResultKind::Download.is_cache_hit());

        assert!(ResultKind::None.is_terminal());
        assert!(ResultKind::Download.is_terminal());
        assert!(!ResultKind::Progress.is_terminal());
    }

    #[test]
    fn test_result_kind_display() {
        assert_eq!(ResultKind::MemoryCache.to_string(), "memory-cache");
        assert_eq!(ResultKind::Progress.to_string(), "progress");
    }

    #[test]
    fn test_progress_result_shape() {
        let id = RequestId::next();
        let result = ImageResult::progress(
            id,
            FetchProgress {
                bytes_received: 10,
                bytes_expected: Some(100),
            },
            Duration::from_millis(5),
            1.0,
        );

        assert_eq!(result.kind, ResultKind::Progress);
        assert!(!result.is_terminal());
        assert!(result.image.is_none());
        assert!(result.error.is_none());
        assert!(result.progress.is_some());
    }

    #[test]
    fn test_failure_result_shape() {
        let id = RequestId::next();
        let result = ImageResult::failure(
            id,
            RequestError::Fetch(FetchError::Transport("reset".to_string())),
            Duration::from_millis(5),
            1.0,
        );

        assert_eq!(result.kind, ResultKind::None);
        assert!(result.is_terminal());
        assert!(!result.is_success());
        assert!(result.error.is_some());
        assert!(result.image.is_none());
    }

    #[test]
    fn test_request_options_quality_clamped() {
        assert_eq!(RequestOptions::new().with_quality(2.0).quality, 1.0);
        assert_eq!(RequestOptions::new().with_quality(-0.5).quality, 0.0);
        assert!(!RequestOptions::default().ignore_cache);
    }
}
