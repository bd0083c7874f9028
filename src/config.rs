//! Runtime configuration for the download pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of tracks processed concurrently within a batch.
pub const DEFAULT_CONCURRENT_DOWNLOADS: usize = 5;

/// Default number of segment fetches in flight per track.
pub const DEFAULT_SEGMENT_CONCURRENCY: usize = 4;

/// Default number of tracks per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default delay between batches, in seconds.
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 15;

/// Tunables for the batch orchestrator and fetch layer.
///
/// All fields have sensible defaults; a partial config (e.g. from a TOML or
/// JSON fragment) fills the rest via `#[serde(default)]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Destination directory for finished files.
    pub output_dir: PathBuf,
    /// Tracks processed concurrently within a batch.
    pub concurrent_downloads: usize,
    /// Segment fetches in flight per track.
    pub segment_concurrency: usize,
    /// Tracks per batch.
    pub batch_size: usize,
    /// Delay between batches (skipped after the last batch), seconds.
    pub batch_delay_secs: u64,
    /// Uniform random per-track delay applied after a successful download,
    /// seconds (lower, upper).
    pub track_delay_range: (f64, f64),
    /// Fetch attempts per URL before the track is failed.
    pub max_fetch_attempts: u32,
    /// Minimum spacing between upstream stream-resolution calls, milliseconds.
    pub resolve_interval_ms: u64,
    /// Base64 master key used to unwrap security tokens. Usually supplied via
    /// the `MASTER_KEY` environment variable, never logged.
    pub master_key: Option<String>,
    /// Skip tracks whose stored quality already meets the requested tier.
    pub skip_existing: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            concurrent_downloads: DEFAULT_CONCURRENT_DOWNLOADS,
            segment_concurrency: DEFAULT_SEGMENT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay_secs: DEFAULT_BATCH_DELAY_SECS,
            track_delay_range: (3.0, 6.0),
            max_fetch_attempts: crate::download::DEFAULT_MAX_ATTEMPTS,
            resolve_interval_ms: 1000,
            master_key: None,
            skip_existing: true,
        }
    }
}

impl DownloadConfig {
    /// Defaults with environment overrides applied (`MASTER_KEY`,
    /// `TRACKDL_OUTPUT_DIR`).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("MASTER_KEY") {
            if !key.trim().is_empty() {
                config.master_key = Some(key);
            }
        }
        if let Ok(dir) = std::env::var("TRACKDL_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                config.output_dir = PathBuf::from(dir);
            }
        }
        config
    }
}
