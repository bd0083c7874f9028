//! Moving a processed file to its final destination and tagging it.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::AudioIdentity;
use crate::tags;

/// Extensions whose containers carry tags we know how to write.
const TAGGABLE_EXTENSIONS: &[&str] = &["flac", "m4a", "mp4", "mp3"];

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("could not create destination directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Moves `processed` to `destination`, correcting the destination extension
/// to match the file actually produced, then best-effort tags it.
///
/// The move prefers an atomic rename and falls back to copy-and-remove when
/// the destination is on another filesystem. Tagging failures are logged
/// and never fail a finished download.
///
/// # Errors
///
/// Returns [`FinalizeError`] when the destination cannot be created or the
/// file cannot be moved.
#[instrument(skip(identity), fields(from = %processed.display(), to = %destination.display()))]
pub async fn finalize(
    processed: &Path,
    destination: &Path,
    identity: &AudioIdentity,
) -> Result<PathBuf, FinalizeError> {
    let extension = processed
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let destination = if extension.is_empty() {
        destination.to_path_buf()
    } else {
        destination.with_extension(&extension)
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| FinalizeError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    move_file(processed, &destination).await?;

    if TAGGABLE_EXTENSIONS.contains(&extension.as_str()) {
        if let Err(error) = tags::write_tags(&destination, identity) {
            warn!(error = %error, "tagging failed, keeping untagged file");
        }
    } else {
        debug!(%extension, "extension not taggable, skipping tags");
    }

    info!(path = %destination.display(), "finalized download");
    Ok(destination)
}

/// Rename with cross-device fallback.
async fn move_file(from: &Path, to: &Path) -> Result<(), FinalizeError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            debug!(error = %rename_error, "rename failed, copying instead");
            tokio::fs::copy(from, to)
                .await
                .map_err(|source| FinalizeError::Move {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    source,
                })?;
            tokio::fs::remove_file(from)
                .await
                .map_err(|source| FinalizeError::Move {
                    from: from.to_path_buf(),
                    to: to.to_path_buf(),
                    source,
                })
        }
    }
}
