//! Network retrieval of image bytes.
//!
//! The [`Fetcher`] trait abstracts the transport so the manager can be
//! driven by mocks in tests; [`HttpFetcher`] is the production
//! implementation over a pooled reqwest client.

mod http;
mod types;

pub use http::HttpFetcher;
pub use types::{FetchError, FetchProgress, FetchedBytes, Fetcher, ResponseMetadata};

#[cfg(test)]
pub use http::tests::MockFetcher;
