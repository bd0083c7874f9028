//! Per-track scratch directories.
//!
//! Every track is processed inside its own temporary directory which is
//! removed when the workspace is dropped, so failed or aborted downloads
//! never leave partial audio behind.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Longest label carried into the directory prefix.
const MAX_LABEL_LEN: usize = 50;

/// A self-cleaning scratch directory for one track.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creates a fresh scratch directory whose name embeds `label`.
    ///
    /// The label is sanitized to alphanumerics, `-` and `_` and truncated,
    /// so any track title is acceptable.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory cannot be created.
    pub fn create(label: &str) -> io::Result<Self> {
        let prefix = format!("trackdl_{}_", sanitize_label(label));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir()?;
        debug!(path = %dir.path().display(), "created workspace");
        Ok(Self { dir })
    }

    /// The workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The subdirectory holding raw segments, created on first call.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the subdirectory cannot be
    /// created.
    pub fn segments_dir(&self) -> io::Result<PathBuf> {
        let dir = self.dir.path().join("segments");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_LABEL_LEN)
        .collect()
}
