//! In-flight request groups.
//!
//! One group exists per resource key while a fetch is running. All waiters
//! for that key hang off the group; the fetch task fans results out to them
//! and tears the group down on terminal delivery.

use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::result::{ImageResult, RequestId};
use crate::fetcher::FetchProgress;

/// One caller waiting on a shared fetch.
pub(crate) struct Waiter {
    /// The caller's request id
    pub id: RequestId,
    /// Delivery channel back to the caller
    pub tx: UnboundedSender<ImageResult>,
    /// When this caller submitted, for per-caller durations
    pub submitted: Instant,
    /// Quality tag from the caller's request options
    pub quality: f32,
}

/// State for one in-flight fetch: the waiter set, the most recent progress
/// snapshot (replayed to late joiners), and the fetch's cancellation token.
pub(crate) struct InFlightGroup {
    pub waiters: Vec<Waiter>,
    pub latest_progress: Option<FetchProgress>,
    pub cancel: CancellationToken,
}

impl InFlightGroup {
    pub fn new(first: Waiter, cancel: CancellationToken) -> Self {
        Self {
            waiters: vec![first],
            latest_progress: None,
            cancel,
        }
    }

    /// Remove a waiter by id. Returns true if it was present.
    pub fn remove_waiter(&mut self, id: RequestId) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        self.waiters.len() < before
    }
}

/// Statistics for monitoring request coordination.
#[derive(Debug, Default, Clone)]
pub struct ManagerStats {
    /// Total requests received
    pub total_requests: u64,
    /// Requests that joined an already in-flight fetch
    pub coalesced_requests: u64,
    /// Requests served from the memory tier
    pub memory_hits: u64,
    /// Requests served from the persistent tier
    pub disk_hits: u64,
    /// Completed network fetches
    pub downloads: u64,
    /// Failed network fetches (including decode failures)
    pub download_failures: u64,
    /// Requests cancelled before completion
    pub cancellations: u64,
}

impl ManagerStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }

    /// Returns the fraction of requests answered from either cache tier.
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.memory_hits + self.disk_hits) as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn waiter(id: RequestId) -> Waiter {
        let (tx, _rx) = mpsc::unbounded_channel();
        Waiter {
            id,
            tx,
            submitted: Instant::now(),
            quality: 1.0,
        }
    }

    #[test]
    fn test_remove_waiter() {
        let a = RequestId::next();
        let b = RequestId::next();

        let mut group = InFlightGroup::new(waiter(a), CancellationToken::new());
        group.waiters.push(waiter(b));

        assert!(group.remove_waiter(a));
        assert_eq!(group.waiters.len(), 1);
        assert!(!group.remove_waiter(a));
        assert!(group.remove_waiter(b));
        assert!(group.waiters.is_empty());
    }

    #[test]
    fn test_coalescing_ratio() {
        let stats = ManagerStats {
            total_requests: 10,
            coalesced_requests: 4,
            ..Default::default()
        };
        assert!((stats.coalescing_ratio() - 0.4).abs() < f64::EPSILON);

        assert_eq!(ManagerStats::default().coalescing_ratio(), 0.0);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let stats = ManagerStats {
            total_requests: 10,
            memory_hits: 3,
            disk_hits: 2,
            ..Default::default()
        };
        assert!((stats.cache_hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
