//! HTTP acquisition: streaming client, retrying fetcher, request pacing.

mod client;
mod error;
mod fetcher;
mod rate_limiter;

pub use client::{HttpClient, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use error::FetchError;
pub use fetcher::{SegmentFetcher, DEFAULT_MAX_ATTEMPTS};
pub use rate_limiter::RateLimiter;
