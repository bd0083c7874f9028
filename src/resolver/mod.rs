//! Resolution of track identifiers into fetchable stream descriptors.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Quality, StreamDescriptor, TrackRequest};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("track {track_id} is unavailable")]
    Unavailable { track_id: String },

    #[error("could not read manifest {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maps a track identifier and requested quality to a stream descriptor.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolves `track_id` at `quality` into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unavailable`] when the track cannot be
    /// served at any quality.
    async fn resolve(
        &self,
        track_id: &str,
        quality: Quality,
    ) -> Result<StreamDescriptor, ResolveError>;
}

/// One manifest line: the track to download and its stream descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub track_id: String,
    pub identity: crate::model::AudioIdentity,
    pub quality: Quality,
    pub stream: StreamDescriptor,
}

impl ManifestEntry {
    /// The batch request this entry describes.
    #[must_use]
    pub fn request(&self) -> TrackRequest {
        TrackRequest {
            track_id: self.track_id.clone(),
            identity: self.identity.clone(),
            quality: self.quality,
        }
    }
}

/// Reads a JSON manifest of [`ManifestEntry`] records.
///
/// # Errors
///
/// Returns [`ResolveError`] if the file cannot be read or parsed.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>, ResolveError> {
    let raw = std::fs::read(path).map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<ManifestEntry> = serde_json::from_slice(&raw)?;
    debug!(count = entries.len(), "loaded manifest");
    Ok(entries)
}

/// Resolver backed by a pre-loaded manifest.
#[derive(Debug, Default)]
pub struct ManifestResolver {
    streams: HashMap<String, StreamDescriptor>,
}

impl ManifestResolver {
    #[must_use]
    pub fn from_entries(entries: &[ManifestEntry]) -> Self {
        let streams = entries
            .iter()
            .map(|entry| (entry.track_id.clone(), entry.stream.clone()))
            .collect();
        Self { streams }
    }
}

#[async_trait]
impl StreamResolver for ManifestResolver {
    async fn resolve(
        &self,
        track_id: &str,
        _quality: Quality,
    ) -> Result<StreamDescriptor, ResolveError> {
        self.streams
            .get(track_id)
            .cloned()
            .ok_or_else(|| ResolveError::Unavailable {
                track_id: track_id.to_owned(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(track_id: &str) -> ManifestEntry {
        ManifestEntry {
            track_id: track_id.to_owned(),
            identity: crate::model::AudioIdentity {
                title: "T".to_owned(),
                artists: vec!["A".to_owned()],
                ..Default::default()
            },
            quality: Quality::Lossless,
            stream: StreamDescriptor {
                urls: vec!["https://cdn.example.com/file.flac".to_owned()],
                is_encrypted: false,
                encryption_token: None,
                declared_extension: "flac".to_owned(),
                predicted_extension: "flac".to_owned(),
                needs_codec_extraction: false,
                quality: Quality::Lossless,
            },
        }
    }

    #[tokio::test]
    async fn test_manifest_resolver_finds_known_track() {
        let resolver = ManifestResolver::from_entries(&[entry("1"), entry("2")]);
        let descriptor = resolver.resolve("2", Quality::Lossless).await.unwrap();
        assert_eq!(descriptor.urls.len(), 1);
    }

    #[tokio::test]
    async fn test_manifest_resolver_reports_unknown_track() {
        let resolver = ManifestResolver::from_entries(&[entry("1")]);
        let result = resolver.resolve("missing", Quality::Lossless).await;
        assert!(matches!(
            result,
            Err(ResolveError::Unavailable { track_id }) if track_id == "missing"
        ));
    }

    #[test]
    fn test_manifest_roundtrips_through_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        let json = serde_json::to_vec(&[entry("9")]).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = load_manifest(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].track_id, "9");
        assert_eq!(loaded[0].request().quality, Quality::Lossless);
    }

    #[test]
    fn test_manifest_missing_file_is_io_error() {
        let result = load_manifest(Path::new("/nonexistent/manifest.json"));
        assert!(matches!(result, Err(ResolveError::Io { .. })));
    }
}
