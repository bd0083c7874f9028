//! Minimum-interval pacing for upstream requests.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default spacing between resolution requests.
const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Enforces a minimum interval between consecutive calls to [`acquire`].
///
/// Callers share one limiter per upstream. The limiter serializes its own
/// bookkeeping but not the guarded work, so a caller that needs strict
/// one-at-a-time access pairs it with its own mutex.
///
/// [`acquire`]: RateLimiter::acquire
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given minimum interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// The default one-second spacing.
    #[must_use]
    pub fn default_interval() -> Duration {
        Duration::from_millis(DEFAULT_INTERVAL_MS)
    }

    /// Waits until at least the configured interval has elapsed since the
    /// previous successful acquire, then records the current instant.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut last = self.last.lock().await;
        let now = Instant::now();
        if let Some(previous) = *last {
            let elapsed = now.duration_since(previous);
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "rate limit pacing");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::default_interval())
    }
}
