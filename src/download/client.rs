//! HTTP client wrapper for streaming segment downloads.
//!
//! One [`HttpClient`] is created by the composition root and shared across all
//! concurrent fetches; the underlying connection pool is sized to the
//! configured download concurrency.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use crate::signals::ControlSignals;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes, hi-res segments can be large).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// HTTP client for streaming URL bodies to local files.
///
/// Designed to be created once and cloned cheaply (reqwest clients share their
/// pool on clone).
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts and pool sizing.
    ///
    /// # Panics
    ///
    /// Panics if the builder fails with the static configuration, which does
    /// not happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_settings(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, 10)
    }

    /// Creates a client with explicit timeouts and a connection pool scaled
    /// to the number of concurrent fetches.
    ///
    /// # Panics
    ///
    /// Panics if the builder fails with the supplied configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_settings(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
        max_connections: usize,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .pool_max_idle_per_host(max_connections)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Streams one URL's body into `dest`, creating or truncating it.
    ///
    /// The body is written chunk by chunk without buffering the whole payload
    /// in memory. The abort signal is checked before every chunk write; on
    /// abort the partial file is deleted and [`FetchError::Cancelled`] is
    /// returned. Any other failure also deletes the partial file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for malformed URLs, transport failures,
    /// non-success statuses, IO failures, or cancellation.
    #[instrument(skip(self, signals), fields(url = %url))]
    pub async fn fetch_to_path(
        &self,
        url: &str,
        dest: &Path,
        signals: &ControlSignals,
    ) -> Result<u64, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let result = self.fetch_inner(url, dest, signals).await;
        if result.is_err() && dest.exists() {
            debug!(path = %dest.display(), "removing partial file after fetch failure");
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &Path,
        signals: &ControlSignals,
    ) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let file = File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest.to_path_buf(), e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if signals.is_aborted() {
                return Err(FetchError::cancelled(url));
            }
            let chunk = chunk.map_err(|e| FetchError::network(url, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(dest.to_path_buf(), e))?;
            bytes_written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::io(dest.to_path_buf(), e))?;

        debug!(bytes = bytes_written, path = %dest.display(), "fetch complete");
        Ok(bytes_written)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_writes_exact_body() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/seg_0.m4a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"segment payload"))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let dest = dir.path().join("seg_0.m4a");
        let url = format!("{}/seg_0.m4a", server.uri());

        let bytes = client
            .fetch_to_path(&url, &dest, &ControlSignals::new())
            .await
            .unwrap();

        assert_eq!(bytes, 15);
        assert_eq!(std::fs::read(&dest).unwrap(), b"segment payload");
    }

    #[tokio::test]
    async fn test_fetch_large_body_streams() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let body = vec![0x5Au8; 4 * 1024 * 1024];

        Mock::given(method("GET"))
            .and(path("/large.flac"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let dest = dir.path().join("large.flac");
        let url = format!("{}/large.flac", server.uri());

        client
            .fetch_to_path(&url, &dest, &ControlSignals::new())
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), body.len() as u64);
    }

    #[tokio::test]
    async fn test_fetch_error_status_leaves_no_file() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/missing.m4a"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let dest = dir.path().join("missing.m4a");
        let url = format!("{}/missing.m4a", server.uri());

        let result = client
            .fetch_to_path(&url, &dest, &ControlSignals::new())
            .await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 404, .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let dir = TempDir::new().unwrap();
        let client = HttpClient::new();
        let result = client
            .fetch_to_path("not-a-url", &dir.path().join("x"), &ControlSignals::new())
            .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_fetch_aborted_before_body_is_cancelled() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/seg.m4a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 64 * 1024]))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let signals = ControlSignals::new();
        signals.stop();

        let dest = dir.path().join("seg.m4a");
        let url = format!("{}/seg.m4a", server.uri());

        let result = client.fetch_to_path(&url, &dest, &signals).await;
        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
        assert!(!dest.exists(), "partial output must be deleted on abort");
    }
}
