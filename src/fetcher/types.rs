//! Fetcher types and trait.

use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during a network fetch.
///
/// Cloneable so a single failure can fan out to every caller waiting on the
/// same in-flight download.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Transport-level failure (connect, timeout, stream interruption)
    #[error("transport error: {0}")]
    Transport(String),

    /// The fetch was cancelled before completion
    #[error("fetch cancelled")]
    Cancelled,
}

/// Incremental download progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchProgress {
    /// Bytes received so far
    pub bytes_received: u64,
    /// Total bytes expected, when the server reported a length
    pub bytes_expected: Option<u64>,
}

impl FetchProgress {
    /// Completed fraction in [0, 1], or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.bytes_expected {
            Some(expected) if expected > 0 => {
                Some((self.bytes_received as f64 / expected as f64).min(1.0))
            }
            _ => None,
        }
    }
}

/// Transport-level metadata from a completed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    /// HTTP status code
    pub status: u16,
    /// Final URL after any redirects
    pub final_url: String,
    /// Content-Type header, if present
    pub content_type: Option<String>,
    /// Content-Length header, if present
    pub content_length: Option<u64>,
}

/// Successful fetch outcome: raw bytes plus response metadata.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    /// The downloaded body
    pub bytes: Vec<u8>,
    /// Transport metadata
    pub metadata: ResponseMetadata,
}

/// Trait for network image retrieval.
///
/// Implementations stream the body, reporting progress through the provided
/// channel as chunks arrive. Cancelling the token stops the transfer: no
/// further progress is sent and the future resolves to
/// [`FetchError::Cancelled`]. Implementations never retry internally; retry
/// policy belongs to the caller's own configuration.
pub trait Fetcher: Send + Sync {
    /// Fetch the resource at `url`.
    fn fetch(
        &self,
        url: &str,
        progress: UnboundedSender<FetchProgress>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<FetchedBytes, FetchError>> + Send;
}
