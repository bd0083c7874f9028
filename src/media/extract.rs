//! Lossless FLAC extraction from MP4 containers via `ffmpeg`.
//!
//! Hi-res streams arrive as FLAC frames boxed in fragmented MP4. The
//! extractor rewraps them into a native `.flac` file with stream copy, so
//! no transcoding ever happens.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Bound on one ffmpeg rewrap. Stream copy is fast even for long tracks.
const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("ffmpeg could not be launched: {source}")]
    Launch {
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg timed out after {}s for {path}", EXTRACT_TIMEOUT.as_secs())]
    Timeout { path: PathBuf },

    #[error("ffmpeg exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("ffmpeg produced no output file at {path}")]
    NoOutput { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rewraps FLAC audio out of an MP4 container into a sibling `.flac` file,
/// copying global metadata and removing the source on success.
///
/// # Errors
///
/// Returns [`ExtractionError`] if ffmpeg is missing, fails, times out, or
/// leaves no output behind.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn extract_flac(path: &Path) -> Result<PathBuf, ExtractionError> {
    let output_path = path.with_extension("flac");

    let invocation = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(path)
        .args(["-map", "0", "-movflags", "use_metadata_tags", "-c:a", "copy"])
        .args(["-map_metadata", "0:g"])
        .arg(&output_path)
        .output();

    let output = tokio::time::timeout(EXTRACT_TIMEOUT, invocation)
        .await
        .map_err(|_| ExtractionError::Timeout {
            path: path.to_path_buf(),
        })?
        .map_err(|source| ExtractionError::Launch { source })?;

    if !output.status.success() {
        return Err(ExtractionError::Failed {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    if !output_path.is_file() {
        return Err(ExtractionError::NoOutput { path: output_path });
    }

    tokio::fs::remove_file(path)
        .await
        .map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(output = %output_path.display(), "extracted flac stream");
    Ok(output_path)
}
