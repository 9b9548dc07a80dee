//! HTTP fetcher backed by reqwest.

use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{FetchError, FetchProgress, FetchedBytes, Fetcher, ResponseMetadata};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent for image requests
const DEFAULT_USER_AGENT: &str = concat!("remoteimage/", env!("CARGO_PKG_VERSION"));

/// Production fetcher using a pooled reqwest client.
///
/// Bodies are streamed chunk by chunk so waiters can observe download
/// progress before the full payload has arrived.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        progress: UnboundedSender<FetchProgress>,
        cancel: CancellationToken,
    ) -> Result<FetchedBytes, FetchError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.client.get(url).send() => {
                result.map_err(|e| FetchError::Transport(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let metadata = ResponseMetadata {
            status: status.as_u16(),
            final_url: response.url().to_string(),
            content_type: response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            content_length: response.content_length(),
        };

        let expected = metadata.content_length;
        let mut bytes = Vec::with_capacity(expected.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(data)) => {
                    bytes.extend_from_slice(&data);
                    // Receiver going away is not an error; progress is advisory
                    let _ = progress.send(FetchProgress {
                        bytes_received: bytes.len() as u64,
                        bytes_expected: expected,
                    });
                }
                Some(Err(e)) => return Err(FetchError::Transport(e.to_string())),
                None => break,
            }
        }

        debug!(url = %url, bytes = bytes.len(), "download complete");

        Ok(FetchedBytes { bytes, metadata })
    }
}
