//! End-to-end track processing and batch scheduling.
//!
//! The orchestrator owns the full pipeline for one track (skip check,
//! resolve, assemble, inspect, extract, finalize, record) and schedules
//! many tracks in bounded-concurrency batches with pacing between them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::assemble::{AssemblyError, StreamAssembler};
use crate::config::DownloadConfig;
use crate::download::RateLimiter;
use crate::media;
use crate::model::{FailureKind, ProcessingResult, TrackRequest};
use crate::resolver::{ResolveError, StreamResolver};
use crate::signals::ControlSignals;
use crate::store::DownloadStore;
use crate::workspace::Workspace;
use crate::finalize;

/// Runs tracks through the download pipeline.
#[derive(Clone)]
pub struct BatchOrchestrator {
    assembler: Arc<StreamAssembler>,
    resolver: Arc<dyn StreamResolver>,
    store: Arc<dyn DownloadStore>,
    signals: ControlSignals,
    config: Arc<DownloadConfig>,
    // Resolution is serialized and paced; the upstream catalog endpoint is
    // far more sensitive than the CDN.
    resolve_gate: Arc<Mutex<()>>,
    resolve_limiter: Arc<RateLimiter>,
}

impl BatchOrchestrator {
    #[must_use]
    pub fn new(
        assembler: Arc<StreamAssembler>,
        resolver: Arc<dyn StreamResolver>,
        store: Arc<dyn DownloadStore>,
        signals: ControlSignals,
        config: Arc<DownloadConfig>,
    ) -> Self {
        let resolve_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.resolve_interval_ms,
        )));
        Self {
            assembler,
            resolver,
            store,
            signals,
            config,
            resolve_gate: Arc::new(Mutex::new(())),
            resolve_limiter,
        }
    }

    /// Requests a graceful stop, cancelling in-flight and pending work.
    pub fn stop(&self) {
        self.signals.stop();
    }

    /// Pauses new fetch attempts until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.signals.pause();
    }

    /// Resumes after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.signals.resume();
    }

    /// Processes one track end to end.
    #[instrument(skip_all, fields(track_id = %request.track_id, title = %request.identity.title))]
    pub async fn process_track(&self, request: &TrackRequest) -> ProcessingResult {
        if self.signals.is_aborted() {
            return ProcessingResult::failed(FailureKind::Cancelled);
        }

        if self.config.skip_existing && self.already_good_enough(request).await {
            info!("already downloaded at sufficient quality, skipping");
            return ProcessingResult::ok(None);
        }

        let descriptor = {
            let _gate = self.resolve_gate.lock().await;
            self.resolve_limiter.acquire().await;
            match self
                .resolver
                .resolve(&request.track_id, request.quality)
                .await
            {
                Ok(descriptor) => descriptor,
                Err(ResolveError::Unavailable { .. }) => {
                    warn!("track unavailable upstream");
                    return ProcessingResult::failed(FailureKind::Unavailable);
                }
                Err(error) => {
                    warn!(error = %error, "resolution failed");
                    return ProcessingResult::failed(FailureKind::Unavailable);
                }
            }
        };

        let workspace = match Workspace::create(&request.identity.safe_name()) {
            Ok(workspace) => workspace,
            Err(error) => {
                // Scratch space trouble is machine-wide. Stop the run
                // instead of burning through the rest of the batch.
                warn!(error = %error, "could not create workspace, stopping run");
                self.signals.stop();
                return ProcessingResult::failed(FailureKind::Workspace);
            }
        };

        let merged = match self.assembler.assemble(&descriptor, &workspace).await {
            Ok(path) => path,
            Err(error) => {
                warn!(error = %error, "assembly failed");
                return ProcessingResult::failed(failure_kind(&error));
            }
        };

        let report = media::probe(&merged).await;
        if descriptor.declared_extension != descriptor.predicted_extension {
            warn!(
                declared = %descriptor.declared_extension,
                predicted = %descriptor.predicted_extension,
                "manifest extension disagrees with prediction"
            );
        }
        if !report.codec.is_empty() && !report.codec_is_expected() {
            warn!(codec = %report.codec, "unexpected codec in downloaded stream");
        }

        let processed = if descriptor.needs_codec_extraction
            && report.codec == "flac"
            && report.container.contains("mp4")
        {
            match media::extract_flac(&merged).await {
                Ok(path) => path,
                Err(error) => {
                    warn!(error = %error, "flac extraction failed");
                    return ProcessingResult::failed(FailureKind::Extraction);
                }
            }
        } else {
            merged
        };

        let destination = self.config.output_dir.join(format!(
            "{}.{}",
            request.identity.safe_name(),
            descriptor.declared_extension
        ));
        let final_path = match finalize::finalize(&processed, &destination, &request.identity).await
        {
            Ok(path) => path,
            Err(error) => {
                warn!(error = %error, "finalization failed");
                return ProcessingResult::failed(FailureKind::Finalize);
            }
        };

        if let Err(error) = self
            .store
            .record_download(&request.track_id, &final_path, descriptor.quality)
            .await
        {
            warn!(error = %error, "could not record download");
        }

        self.post_track_delay().await;
        ProcessingResult::ok(Some(final_path))
    }

    /// Processes all requests in bounded-concurrency batches, returning
    /// per-track success.
    pub async fn process_batch(&self, requests: &[TrackRequest]) -> HashMap<String, bool> {
        let mut outcomes = HashMap::with_capacity(requests.len());
        let batch_size = self.config.batch_size.max(1);
        let chunks: Vec<&[TrackRequest]> = requests.chunks(batch_size).collect();
        let total_batches = chunks.len();

        let progress = ProgressBar::new(requests.len() as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        for (batch_index, chunk) in chunks.into_iter().enumerate() {
            if self.signals.is_aborted() {
                for request in chunk {
                    outcomes.insert(request.track_id.clone(), false);
                }
                continue;
            }

            info!(
                batch = batch_index + 1,
                total_batches,
                tracks = chunk.len(),
                "starting batch"
            );

            let semaphore = Arc::new(Semaphore::new(self.config.concurrent_downloads.max(1)));
            let mut tasks: JoinSet<(String, ProcessingResult)> = JoinSet::new();

            for request in chunk {
                let orchestrator = self.clone();
                let request = request.clone();
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (
                            request.track_id.clone(),
                            ProcessingResult::failed(FailureKind::Cancelled),
                        );
                    };
                    let result = orchestrator.process_track(&request).await;
                    (request.track_id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Ok((track_id, result)) = joined {
                    if let Some(path) = &result.final_path {
                        progress.set_message(path.display().to_string());
                    }
                    outcomes.insert(track_id, result.success);
                }
                progress.inc(1);
            }

            let last_batch = batch_index + 1 == total_batches;
            if !last_batch && !self.signals.is_aborted() {
                debug!(
                    delay_secs = self.config.batch_delay_secs,
                    "pausing between batches"
                );
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(self.config.batch_delay_secs)) => {}
                    () = self.signals.cancelled() => {}
                }
            }
        }

        progress.finish_and_clear();
        let succeeded = outcomes.values().filter(|ok| **ok).count();
        info!(succeeded, total = outcomes.len(), "batch run complete");
        outcomes
    }

    /// True when the store already holds this track at the requested
    /// quality or better. Store errors degrade to "not downloaded".
    async fn already_good_enough(&self, request: &TrackRequest) -> bool {
        match self.store.best_quality(&request.track_id).await {
            Ok(Some(existing)) => request.quality.rank() <= existing.rank(),
            Ok(None) => false,
            Err(error) => {
                warn!(error = %error, "history lookup failed, downloading anyway");
                false
            }
        }
    }

    /// Sleeps a randomized interval after a successful track, unless the
    /// run is being stopped.
    async fn post_track_delay(&self) {
        let (low, high) = self.config.track_delay_range;
        if high <= 0.0 || self.signals.is_aborted() {
            return;
        }
        let seconds = if high > low {
            use rand::Rng;
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        debug!(seconds, "post-track delay");
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
            () = self.signals.cancelled() => {}
        }
    }
}

fn failure_kind(error: &AssemblyError) -> FailureKind {
    match error {
        AssemblyError::Segment { .. } => FailureKind::Network,
        AssemblyError::Crypto(_) => FailureKind::Crypto,
        AssemblyError::Cancelled => FailureKind::Cancelled,
        AssemblyError::MissingSegment { .. } | AssemblyError::Io { .. } => FailureKind::Assembly,
    }
}

/// Convenience constructor wiring the standard pipeline from a config.
#[must_use]
pub fn build_orchestrator(
    resolver: Arc<dyn StreamResolver>,
    store: Arc<dyn DownloadStore>,
    config: DownloadConfig,
) -> BatchOrchestrator {
    use crate::download::{HttpClient, SegmentFetcher};

    let signals = ControlSignals::new();
    let fetcher = Arc::new(SegmentFetcher::with_max_attempts(
        HttpClient::new(),
        signals.clone(),
        config.max_fetch_attempts,
    ));
    let assembler = Arc::new(StreamAssembler::new(
        fetcher,
        config.segment_concurrency,
        config.master_key.clone(),
    ));
    BatchOrchestrator::new(assembler, resolver, store, signals, Arc::new(config))
}
