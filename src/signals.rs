//! Process-wide abort and pause signalling.
//!
//! The library never installs OS signal handlers itself: the composition root
//! (the binary) owns a [`ControlSignals`] handle, spawns a watcher task that
//! trips `stop()` on termination signals, and passes clones into every
//! component that suspends on I/O. Abort is edge-triggered and permanent;
//! pause blocks fetch attempts without discarding work and can be cleared.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Cloneable abort/pause handle shared across all download tasks.
#[derive(Debug, Clone)]
pub struct ControlSignals {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    abort: watch::Sender<bool>,
    pause: watch::Sender<bool>,
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSignals {
    /// Creates a handle with neither abort nor pause set.
    #[must_use]
    pub fn new() -> Self {
        let (abort, _) = watch::channel(false);
        let (pause, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner { abort, pause }),
        }
    }

    /// Sets the abort signal. Irreversible; also clears pause so that tasks
    /// blocked in [`wait_if_paused`](Self::wait_if_paused) can observe it.
    pub fn stop(&self) {
        info!("abort signal set, downloads stopping");
        self.inner.pause.send_replace(false);
        self.inner.abort.send_replace(true);
    }

    /// Whether abort has been requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.inner.abort.borrow()
    }

    /// Blocks new fetch attempts until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        info!("downloads paused");
        self.inner.pause.send_replace(true);
    }

    /// Clears the pause signal.
    pub fn resume(&self) {
        info!("downloads resumed");
        self.inner.pause.send_replace(false);
    }

    /// Whether pause is currently set.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.inner.pause.borrow()
    }

    /// Resolves once abort is set. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.abort.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits while pause is set. Returns immediately when not paused; an
    /// abort during the wait also releases the caller (which must then check
    /// [`is_aborted`](Self::is_aborted)).
    pub async fn wait_if_paused(&self) {
        let mut rx = self.inner.pause.subscribe();
        while *rx.borrow_and_update() {
            if self.is_aborted() || rx.changed().await.is_err() {
                return;
            }
        }
    }
}
