//! Retrying fetch of one URL to one local file.
//!
//! Wraps [`HttpClient`] with the per-segment retry policy: a fixed attempt
//! bound with exponential `2^attempt`-second backoff, no sleep after the
//! final attempt, and abort/pause handling at every decision point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::client::HttpClient;
use super::error::FetchError;
use crate::signals::ControlSignals;

/// Default fetch attempts per URL.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff unit: delays are `2^attempt` of these.
const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Fetches URLs to files with bounded retries and cancellation support.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: HttpClient,
    signals: ControlSignals,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl SegmentFetcher {
    /// Creates a fetcher with the default attempt bound.
    #[must_use]
    pub fn new(client: HttpClient, signals: ControlSignals) -> Self {
        Self::with_max_attempts(client, signals, DEFAULT_MAX_ATTEMPTS)
    }

    /// Creates a fetcher with an explicit attempt bound (minimum 1).
    #[must_use]
    pub fn with_max_attempts(
        client: HttpClient,
        signals: ControlSignals,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            signals,
            max_attempts: max_attempts.max(1),
            backoff_unit: BACKOFF_UNIT,
        }
    }

    #[cfg(test)]
    fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// The shared abort/pause handle this fetcher observes.
    #[must_use]
    pub fn signals(&self) -> &ControlSignals {
        &self.signals
    }

    /// Downloads `url` into `dest`, retrying transient failures.
    ///
    /// Honors pause (blocks before each attempt) and abort (returns
    /// [`FetchError::Cancelled`] immediately, including during a backoff
    /// sleep). On any failed attempt the partial file has already been
    /// removed by the client.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once the attempt bound is exhausted,
    /// or [`FetchError::Cancelled`] if aborted.
    #[instrument(skip(self), fields(url = %url, dest = %dest.display()))]
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<PathBuf, FetchError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if self.signals.is_aborted() {
                return Err(FetchError::cancelled(url));
            }
            self.signals.wait_if_paused().await;
            if self.signals.is_aborted() {
                return Err(FetchError::cancelled(url));
            }

            debug!(attempt, max = self.max_attempts, "fetch attempt");

            let outcome = tokio::select! {
                result = self.client.fetch_to_path(url, dest, &self.signals) => result,
                () = self.signals.cancelled() => {
                    // The dropped transfer may have left a partial file.
                    let _ = tokio::fs::remove_file(dest).await;
                    Err(FetchError::cancelled(url))
                }
            };

            match outcome {
                Ok(_) => return Ok(dest.to_path_buf()),
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    warn!(attempt, max = self.max_attempts, error = %error, "fetch attempt failed");
                    let final_attempt = attempt == self.max_attempts;
                    last_error = Some(error);

                    if !final_attempt {
                        let delay = backoff_delay(attempt, self.backoff_unit);
                        debug!(delay_ms = delay.as_millis(), "backing off before retry");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = self.signals.cancelled() => {
                                return Err(FetchError::cancelled(url));
                            }
                        }
                    }
                }
            }
        }

        // The loop runs at least once, so an error is always stored. The
        // fallback only covers a zero-attempt bound, which with_max_attempts
        // prevents.
        Err(last_error.unwrap_or_else(|| FetchError::cancelled(url)))
    }
}

/// Exponential backoff: `2^attempt` units after the `attempt`-th failure.
fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit * 2u32.saturating_pow(attempt.min(16))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_backoff_delay_doubles() {
        assert_eq!(backoff_delay(1, BACKOFF_UNIT), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, BACKOFF_UNIT), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, BACKOFF_UNIT), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        assert_eq!(backoff_delay(60, BACKOFF_UNIT), Duration::from_secs(65536));
    }

    #[tokio::test]
    async fn test_fetch_succeeds_first_attempt() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/seg_1.m4a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data"))
            .mount(&server)
            .await;

        let fetcher = SegmentFetcher::new(HttpClient::new(), ControlSignals::new());
        let dest = dir.path().join("seg_1.m4a");
        let url = format!("{}/seg_1.m4a", server.uri());

        let result = fetcher.fetch(&url, &dest).await.unwrap();
        assert_eq!(result, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_fetch_retries_then_succeeds() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        // First attempt fails with 500, the mock then expires and the
        // fallback 200 mock answers the retry.
        Mock::given(method("GET"))
            .and(path("/flaky.m4a"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.m4a"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"recovered"))
            .mount(&server)
            .await;

        let fetcher =
            SegmentFetcher::with_max_attempts(HttpClient::new(), ControlSignals::new(), 2);
        let dest = dir.path().join("flaky.m4a");
        let url = format!("{}/flaky.m4a", server.uri());

        let result = fetcher.fetch(&url, &dest).await;
        assert!(result.is_ok(), "expected recovery on retry: {result:?}");
        assert_eq!(std::fs::read(&dest).unwrap(), b"recovered");
    }

    #[tokio::test]
    async fn test_exhausted_attempts_leave_no_partial_file() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/dead.m4a"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        // Single attempt keeps the test free of backoff sleeps.
        let fetcher =
            SegmentFetcher::with_max_attempts(HttpClient::new(), ControlSignals::new(), 1);
        let dest = dir.path().join("dead.m4a");
        let url = format!("{}/dead.m4a", server.uri());

        let result = fetcher.fetch(&url, &dest).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
        assert!(!dest.exists(), "no partial file may remain after failure");
    }

    #[tokio::test]
    async fn test_all_five_attempts_fail_without_partial_file() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        // expect() makes wiremock verify on drop that the full attempt
        // bound actually hit the server.
        Mock::given(method("GET"))
            .and(path("/always-503.m4a"))
            .respond_with(ResponseTemplate::new(503))
            .expect(u64::from(DEFAULT_MAX_ATTEMPTS))
            .mount(&server)
            .await;

        // Millisecond backoff keeps the 2+4+8+16 unit schedule fast.
        let fetcher = SegmentFetcher::new(HttpClient::new(), ControlSignals::new())
            .with_backoff_unit(Duration::from_millis(1));
        let dest = dir.path().join("always-503.m4a");
        let url = format!("{}/always-503.m4a", server.uri());

        let result = fetcher.fetch(&url, &dest).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
        assert!(!dest.exists(), "no partial file may remain after failure");
    }

    #[tokio::test]
    async fn test_abort_during_backoff_returns_cancelled() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/slow-fail.m4a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let signals = ControlSignals::new();
        let fetcher = SegmentFetcher::with_max_attempts(HttpClient::new(), signals.clone(), 5);
        let dest = dir.path().join("slow-fail.m4a");
        let url = format!("{}/slow-fail.m4a", server.uri());

        let stopper = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.stop();
        });

        // Without the abort this would sleep 2s+4s+...; the abort must cut
        // the first backoff short.
        let started = std::time::Instant::now();
        let result = fetcher.fetch(&url, &dest).await;
        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_aborted_before_start_returns_cancelled() {
        let dir = TempDir::new().unwrap();
        let signals = ControlSignals::new();
        signals.stop();

        let fetcher = SegmentFetcher::new(HttpClient::new(), signals);
        let result = fetcher
            .fetch("https://cdn.example.com/seg.m4a", &dir.path().join("seg"))
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled { .. })));
    }
}
