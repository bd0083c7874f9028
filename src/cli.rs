//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use trackdl_core::config::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENT_DOWNLOADS};

/// Batch download and organize audio tracks.
///
/// trackdl reads a JSON manifest of tracks, downloads each one (single
/// file or segmented), decrypts and reassembles the stream, losslessly
/// rewraps hi-res audio, and files the tagged result into the library.
#[derive(Parser, Debug)]
#[command(name = "trackdl")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the JSON manifest of tracks to download
    pub manifest: PathBuf,

    /// Output directory for finished tracks
    #[arg(short, long, default_value = "downloads")]
    pub out: PathBuf,

    /// Maximum concurrent track downloads (1-50)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENT_DOWNLOADS as u8, value_parser = clap::value_parser!(u8).range(1..=50))]
    pub concurrency: u8,

    /// Tracks per batch before pausing (1-200)
    #[arg(short = 'b', long, default_value_t = DEFAULT_BATCH_SIZE as u8, value_parser = clap::value_parser!(u8).range(1..=200))]
    pub batch_size: u8,

    /// SQLite download-history database (omit for no persistence)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Re-download tracks already recorded in the history
    #[arg(long)]
    pub force: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
