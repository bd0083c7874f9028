//! CLI entry point for the track downloader.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};
use trackdl_core::resolver::{self, ManifestResolver, StreamResolver};
use trackdl_core::store::{DownloadStore, MemoryStore, SqliteStore};
use trackdl_core::{build_orchestrator, DownloadConfig, TrackRequest};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("trackdl starting");

    let entries = resolver::load_manifest(&args.manifest)?;
    if entries.is_empty() {
        info!("Manifest contains no tracks");
        return Ok(());
    }
    let requests: Vec<TrackRequest> = entries.iter().map(resolver::ManifestEntry::request).collect();
    info!(tracks = requests.len(), "Loaded manifest");

    let resolver: Arc<dyn StreamResolver> = Arc::new(ManifestResolver::from_entries(&entries));

    let store: Arc<dyn DownloadStore> = match &args.history {
        Some(path) => Arc::new(SqliteStore::connect(path).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let mut config = DownloadConfig::from_env();
    config.output_dir = args.out.clone();
    config.concurrent_downloads = usize::from(args.concurrency);
    config.batch_size = usize::from(args.batch_size);
    config.skip_existing = !args.force;
    if config.master_key.is_none() {
        warn!("MASTER_KEY is not set; encrypted streams will fail");
    }

    let orchestrator = build_orchestrator(resolver, store, config);

    // First Ctrl-C asks for a graceful stop; in-flight tracks unwind and
    // their workspaces are cleaned up.
    let stopper = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight work unwinds");
            stopper.stop();
        }
    });

    let outcomes = orchestrator.process_batch(&requests).await;

    let succeeded = outcomes.values().filter(|ok| **ok).count();
    let failed = outcomes.len() - succeeded;
    info!(succeeded, failed, total = outcomes.len(), "Run complete");

    for (track_id, ok) in &outcomes {
        if !ok {
            warn!(track_id = %track_id, "track failed");
        }
    }

    Ok(())
}
