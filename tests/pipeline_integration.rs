//! Full pipeline runs: manifest in, finished library files out.

#![allow(clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trackdl_core::batch::BatchOrchestrator;
use trackdl_core::model::{AudioIdentity, Quality, StreamDescriptor};
use trackdl_core::resolver::{ManifestEntry, ManifestResolver, StreamResolver};
use trackdl_core::store::{DownloadStore, MemoryStore};
use trackdl_core::{ControlSignals, DownloadConfig, TrackRequest};

fn entry(track_id: &str, title: &str, url: String) -> ManifestEntry {
    ManifestEntry {
        track_id: track_id.to_owned(),
        identity: AudioIdentity {
            title: title.to_owned(),
            artists: vec!["Integration".to_owned()],
            album: "Pipeline".to_owned(),
            ..Default::default()
        },
        quality: Quality::Lossless,
        stream: StreamDescriptor {
            urls: vec![url],
            is_encrypted: false,
            encryption_token: None,
            declared_extension: "flac".to_owned(),
            predicted_extension: "flac".to_owned(),
            needs_codec_extraction: false,
            quality: Quality::Lossless,
        },
    }
}

fn orchestrator(
    entries: &[ManifestEntry],
    store: Arc<dyn DownloadStore>,
    output_dir: &Path,
) -> BatchOrchestrator {
    use trackdl_core::assemble::StreamAssembler;
    use trackdl_core::download::{HttpClient, SegmentFetcher};

    let signals = ControlSignals::new();
    let fetcher = Arc::new(SegmentFetcher::with_max_attempts(
        HttpClient::new(),
        signals.clone(),
        2,
    ));
    let assembler = Arc::new(StreamAssembler::new(fetcher, 2, None));
    let resolver: Arc<dyn StreamResolver> = Arc::new(ManifestResolver::from_entries(entries));
    let config = DownloadConfig {
        output_dir: output_dir.to_path_buf(),
        track_delay_range: (0.0, 0.0),
        batch_delay_secs: 0,
        resolve_interval_ms: 0,
        ..DownloadConfig::default()
    };
    BatchOrchestrator::new(assembler, resolver, store, signals, Arc::new(config))
}

fn flac_body(fill: u8) -> Vec<u8> {
    let mut body = b"fLaC".to_vec();
    body.resize(8192, fill);
    body
}

#[tokio::test]
async fn manifest_batch_lands_tracks_in_output_directory() {
    let server = MockServer::start().await;
    for (name, fill) in [("one", 0x11u8), ("two", 0x22)] {
        Mock::given(method("GET"))
            .and(path(format!("/{name}.flac")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(flac_body(fill)))
            .mount(&server)
            .await;
    }

    let out = tempfile::TempDir::new().unwrap();
    let entries = vec![
        entry("t1", "First", format!("{}/one.flac", server.uri())),
        entry("t2", "Second", format!("{}/two.flac", server.uri())),
    ];
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(&entries, Arc::clone(&store) as Arc<dyn DownloadStore>, out.path());

    let requests: Vec<TrackRequest> = entries.iter().map(ManifestEntry::request).collect();
    let outcomes = orch.process_batch(&requests).await;

    assert_eq!(outcomes.get("t1"), Some(&true));
    assert_eq!(outcomes.get("t2"), Some(&true));
    assert!(out.path().join("Integration - First.flac").is_file());
    assert!(out.path().join("Integration - Second.flac").is_file());
    assert!(store.is_downloaded("t1").await.unwrap());
    assert!(store.is_downloaded("t2").await.unwrap());
}

#[tokio::test]
async fn second_run_skips_recorded_tracks_without_refetching() {
    let server = MockServer::start().await;
    // The mock only answers once; a second fetch would 404 and fail the run.
    Mock::given(method("GET"))
        .and(path("/once.flac"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(flac_body(0x33)))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let out = tempfile::TempDir::new().unwrap();
    let entries = vec![entry("t9", "Once", format!("{}/once.flac", server.uri()))];
    let store: Arc<dyn DownloadStore> = Arc::new(MemoryStore::new());
    let requests: Vec<TrackRequest> = entries.iter().map(ManifestEntry::request).collect();

    let first = orchestrator(&entries, Arc::clone(&store), out.path());
    assert_eq!(first.process_batch(&requests).await.get("t9"), Some(&true));

    let second = orchestrator(&entries, Arc::clone(&store), out.path());
    assert_eq!(second.process_batch(&requests).await.get("t9"), Some(&true));
}

#[tokio::test]
async fn missing_upstream_track_is_reported_failed() {
    let out = tempfile::TempDir::new().unwrap();
    let entries = vec![entry(
        "present",
        "Here",
        "http://127.0.0.1:1/unreachable.flac".to_owned(),
    )];
    let orch = orchestrator(&entries, Arc::new(MemoryStore::new()), out.path());

    // A request whose id is absent from the manifest resolves to unavailable.
    let missing = TrackRequest {
        track_id: "absent".to_owned(),
        identity: AudioIdentity {
            title: "Gone".to_owned(),
            artists: vec!["Nobody".to_owned()],
            ..Default::default()
        },
        quality: Quality::Lossless,
    };
    let outcomes = orch.process_batch(std::slice::from_ref(&missing)).await;
    assert_eq!(outcomes.get("absent"), Some(&false));
}
