//! Download history, used to skip tracks already acquired at equal or
//! better quality.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::debug;

use crate::model::Quality;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store poisoned")]
    Poisoned,
}

/// Persistence of which tracks were downloaded, where, and at what quality.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Whether any download of `track_id` is recorded.
    async fn is_downloaded(&self, track_id: &str) -> Result<bool, StoreError>;

    /// The best quality recorded for `track_id`, if any.
    async fn best_quality(&self, track_id: &str) -> Result<Option<Quality>, StoreError>;

    /// Records a finished download, replacing any previous record.
    async fn record_download(
        &self,
        track_id: &str,
        path: &Path,
        quality: Quality,
    ) -> Result<(), StoreError>;
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or the
    /// schema cannot be applied.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// An in-memory store, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be applied.
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS downloads (
                track_id      TEXT PRIMARY KEY,
                path          TEXT NOT NULL,
                quality       TEXT NOT NULL,
                downloaded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl DownloadStore for SqliteStore {
    async fn is_downloaded(&self, track_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM downloads WHERE track_id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn best_quality(&self, track_id: &str) -> Result<Option<Quality>, StoreError> {
        let row = sqlx::query("SELECT quality FROM downloads WHERE track_id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|row| row.get::<String, _>(0))
            .and_then(|raw| Quality::parse(&raw)))
    }

    async fn record_download(
        &self,
        track_id: &str,
        path: &Path,
        quality: Quality,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO downloads (track_id, path, quality)
             VALUES (?, ?, ?)
             ON CONFLICT(track_id) DO UPDATE SET
                 path = excluded.path,
                 quality = excluded.quality,
                 downloaded_at = CURRENT_TIMESTAMP",
        )
        .bind(track_id)
        .bind(path.to_string_lossy().into_owned())
        .bind(quality.as_str())
        .execute(&self.pool)
        .await?;
        debug!(track_id, quality = quality.as_str(), "recorded download");
        Ok(())
    }
}

/// In-memory store for tests and one-off runs without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (PathBuf, Quality)>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DownloadStore for MemoryStore {
    async fn is_downloaded(&self, track_id: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.contains_key(track_id))
    }

    async fn best_quality(&self, track_id: &str) -> Result<Option<Quality>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(track_id).map(|(_, quality)| *quality))
    }

    async fn record_download(
        &self,
        track_id: &str,
        path: &Path,
        quality: Quality,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(track_id.to_owned(), (path.to_path_buf(), quality));
        Ok(())
    }
}
