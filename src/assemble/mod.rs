//! Segment acquisition, decryption and ordered reassembly.
//!
//! A stream arrives either as one file or as a list of DASH segment URLs.
//! The assembler downloads everything into the track workspace, decrypts
//! when the descriptor carries a token, and concatenates segments in index
//! order into one playable download.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::crypto::{self, CryptoError, DecryptionMaterial};
use crate::download::{FetchError, SegmentFetcher};
use crate::model::StreamDescriptor;
use crate::workspace::Workspace;

/// Merge read buffer size.
const MERGE_CHUNK_LEN: usize = 4 * 1024 * 1024;

/// A merged file smaller than this is almost certainly an error page.
const SUSPICIOUS_MERGED_LEN: u64 = 1024;

/// Errors from downloading, decrypting or merging a stream.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("segment {index} failed: {source}")]
    Segment {
        index: usize,
        #[source]
        source: FetchError,
    },

    #[error("segment file missing before merge: {path}")]
    MissingSegment { path: PathBuf },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("assembly cancelled")]
    Cancelled,
}

impl AssemblyError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Downloads a described stream into a workspace and produces one file.
#[derive(Debug, Clone)]
pub struct StreamAssembler {
    fetcher: Arc<SegmentFetcher>,
    segment_concurrency: usize,
    master_key: Option<String>,
}

impl StreamAssembler {
    #[must_use]
    pub fn new(
        fetcher: Arc<SegmentFetcher>,
        segment_concurrency: usize,
        master_key: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            segment_concurrency: segment_concurrency.max(1),
            master_key,
        }
    }

    /// Downloads, decrypts and merges the stream into one file inside
    /// `workspace`, returning its path.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] when any segment exhausts its retries, the
    /// decryption token is malformed, a segment file disappears before the
    /// merge, or the run is aborted.
    #[instrument(skip_all, fields(urls = descriptor.urls.len(), encrypted = descriptor.is_encrypted))]
    pub async fn assemble(
        &self,
        descriptor: &StreamDescriptor,
        workspace: &Workspace,
    ) -> Result<PathBuf, AssemblyError> {
        let material = self.material_for(descriptor)?;

        if descriptor.is_segmented() {
            self.assemble_segmented(descriptor, workspace, material.as_ref())
                .await
        } else {
            self.assemble_single(descriptor, workspace, material.as_ref())
                .await
        }
    }

    /// Resolves decryption material up front so a bad token fails before any
    /// network traffic.
    fn material_for(
        &self,
        descriptor: &StreamDescriptor,
    ) -> Result<Option<DecryptionMaterial>, AssemblyError> {
        if !descriptor.is_encrypted {
            return Ok(None);
        }
        let token = descriptor
            .encryption_token
            .as_deref()
            .ok_or(CryptoError::MissingToken)?;
        let master_key = self.master_key.as_deref().ok_or(CryptoError::MissingToken)?;
        Ok(Some(crypto::derive_key(token, master_key)?))
    }

    async fn assemble_single(
        &self,
        descriptor: &StreamDescriptor,
        workspace: &Workspace,
        material: Option<&DecryptionMaterial>,
    ) -> Result<PathBuf, AssemblyError> {
        let url = descriptor
            .urls
            .first()
            .ok_or(AssemblyError::MissingSegment {
                path: workspace.path().join("download"),
            })?;
        let dest = workspace
            .path()
            .join(format!("download.{}", descriptor.declared_extension));

        debug!(dest = %dest.display(), "fetching single-file stream");
        self.fetcher
            .fetch(url, &dest)
            .await
            .map_err(|source| match source {
                FetchError::Cancelled { .. } => AssemblyError::Cancelled,
                other => AssemblyError::Segment {
                    index: 0,
                    source: other,
                },
            })?;

        match material {
            Some(material) => {
                // decrypt_file removes the ciphertext source, so the plain
                // sibling can take back the audio extension.
                let plain = crypto::decrypt_file(&dest, material)?;
                tokio::fs::rename(&plain, &dest)
                    .await
                    .map_err(|source| AssemblyError::io(&dest, source))?;
                Ok(dest)
            }
            None => Ok(dest),
        }
    }

    async fn assemble_segmented(
        &self,
        descriptor: &StreamDescriptor,
        workspace: &Workspace,
        material: Option<&DecryptionMaterial>,
    ) -> Result<PathBuf, AssemblyError> {
        let segments_dir = workspace
            .segments_dir()
            .map_err(|source| AssemblyError::io(workspace.path(), source))?;

        let fetched = self
            .fetch_segments(descriptor, &segments_dir)
            .await?;

        let segments = match material {
            Some(material) => decrypt_segments(&fetched, material)?,
            None => fetched,
        };

        let merged = workspace
            .path()
            .join(format!("download.{}", descriptor.declared_extension));
        merge_segments(&segments, &merged).await?;
        Ok(merged)
    }

    /// Fetches every segment URL concurrently, returning `(index, path)`
    /// pairs. All segments must succeed.
    async fn fetch_segments(
        &self,
        descriptor: &StreamDescriptor,
        segments_dir: &Path,
    ) -> Result<Vec<(usize, PathBuf)>, AssemblyError> {
        let semaphore = Arc::new(Semaphore::new(self.segment_concurrency));
        let mut tasks: JoinSet<Result<(usize, PathBuf), AssemblyError>> = JoinSet::new();
        let extension = descriptor.declared_extension.clone();

        info!(
            count = descriptor.urls.len(),
            concurrency = self.segment_concurrency,
            "fetching segments"
        );

        for url in &descriptor.urls {
            if self.fetcher.signals().is_aborted() {
                tasks.abort_all();
                return Err(AssemblyError::Cancelled);
            }

            let index = segment_index_from_url(url);
            let dest = segments_dir.join(format!("segment_{index:03}.{extension}"));
            let url = url.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AssemblyError::Cancelled)?;
                fetcher
                    .fetch(&url, &dest)
                    .await
                    .map_err(|source| match source {
                        FetchError::Cancelled { .. } => AssemblyError::Cancelled,
                        other => AssemblyError::Segment {
                            index,
                            source: other,
                        },
                    })?;
                Ok((index, dest))
            });
        }

        let mut fetched = Vec::with_capacity(descriptor.urls.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(entry)) => fetched.push(entry),
                Ok(Err(error)) => {
                    tasks.abort_all();
                    return Err(error);
                }
                Err(join_error) if join_error.is_cancelled() => {
                    tasks.abort_all();
                    return Err(AssemblyError::Cancelled);
                }
                Err(join_error) => {
                    tasks.abort_all();
                    return Err(AssemblyError::io(
                        segments_dir,
                        io::Error::other(join_error),
                    ));
                }
            }
        }
        Ok(fetched)
    }
}

/// Decrypts each fetched segment, preserving its index.
fn decrypt_segments(
    segments: &[(usize, PathBuf)],
    material: &DecryptionMaterial,
) -> Result<Vec<(usize, PathBuf)>, AssemblyError> {
    debug!(count = segments.len(), "decrypting segments");
    let mut decrypted = Vec::with_capacity(segments.len());
    for (index, path) in segments {
        let plain = crypto::decrypt_file(path, material)?;
        decrypted.push((*index, plain));
    }
    Ok(decrypted)
}

/// Concatenates segment files in ascending index order into `dest`.
async fn merge_segments(
    segments: &[(usize, PathBuf)],
    dest: &Path,
) -> Result<(), AssemblyError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

    let mut ordered: Vec<&(usize, PathBuf)> = segments.iter().collect();
    ordered.sort_by_key(|(index, _)| *index);

    let output = tokio::fs::File::create(dest)
        .await
        .map_err(|source| AssemblyError::io(dest, source))?;
    let mut writer = BufWriter::new(output);
    let mut buffer = vec![0u8; MERGE_CHUNK_LEN];

    for (index, path) in ordered {
        if !path.is_file() {
            return Err(AssemblyError::MissingSegment { path: path.clone() });
        }
        debug!(index, path = %path.display(), "merging segment");

        let mut input = tokio::fs::File::open(path)
            .await
            .map_err(|source| AssemblyError::io(path, source))?;
        loop {
            let read = input
                .read(&mut buffer)
                .await
                .map_err(|source| AssemblyError::io(path, source))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|source| AssemblyError::io(dest, source))?;
        }
    }

    writer
        .flush()
        .await
        .map_err(|source| AssemblyError::io(dest, source))?;

    let merged_len = tokio::fs::metadata(dest)
        .await
        .map_err(|source| AssemblyError::io(dest, source))?
        .len();
    if merged_len < SUSPICIOUS_MERGED_LEN {
        warn!(len = merged_len, path = %dest.display(), "merged file is suspiciously small");
    }
    info!(len = merged_len, segments = segments.len(), "merged stream");
    Ok(())
}

/// Extracts the segment index from a DASH segment URL.
///
/// The index is the digit run after the last `_` in the filename, before the
/// first `.`, with any query string stripped. URLs without one sort first.
#[must_use]
pub fn segment_index_from_url(url: &str) -> usize {
    let filename = url.rsplit('/').next().unwrap_or(url);
    let filename = filename.split('?').next().unwrap_or(filename);
    let stem = filename.split('.').next().unwrap_or(filename);
    stem.rsplit('_')
        .next()
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_index_from_typical_segment_url() {
        assert_eq!(
            segment_index_from_url("https://cdn.example.com/a/b/segment_12.m4a"),
            12
        );
    }

    #[test]
    fn test_index_ignores_query_string() {
        assert_eq!(
            segment_index_from_url("https://cdn.example.com/seg_7.m4a?token=abc_99"),
            7
        );
    }

    #[test]
    fn test_index_defaults_to_zero() {
        assert_eq!(segment_index_from_url("https://cdn.example.com/init.m4a"), 0);
        assert_eq!(segment_index_from_url("plain"), 0);
    }

    #[test]
    fn test_index_uses_last_underscore_group() {
        assert_eq!(
            segment_index_from_url("https://cdn.example.com/track_44_segment_003.mp4"),
            3
        );
    }

    #[tokio::test]
    async fn test_merge_orders_by_index_not_insertion() {
        let workspace = Workspace::create("merge-order").unwrap();
        let dir = workspace.segments_dir().unwrap();

        let mut segments = Vec::new();
        for (index, body) in [(2usize, b"cc".as_slice()), (0, b"aa"), (1, b"bb")] {
            let path = dir.join(format!("segment_{index:03}.m4a"));
            std::fs::write(&path, body).unwrap();
            segments.push((index, path));
        }

        let dest = workspace.path().join("download.m4a");
        merge_segments(&segments, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"aabbcc");
    }

    #[tokio::test]
    async fn test_merge_fails_on_missing_segment_file() {
        let workspace = Workspace::create("merge-missing").unwrap();
        let dir = workspace.segments_dir().unwrap();

        let present = dir.join("segment_000.m4a");
        std::fs::write(&present, b"aa").unwrap();
        let absent = dir.join("segment_001.m4a");

        let dest = workspace.path().join("download.m4a");
        let result = merge_segments(&[(0, present), (1, absent.clone())], &dest).await;
        assert!(matches!(
            result,
            Err(AssemblyError::MissingSegment { path }) if path == absent
        ));
    }
}
