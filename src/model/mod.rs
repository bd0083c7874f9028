//! Core data model for track downloads.
//!
//! Everything here is constructed by external collaborators (catalog resolution,
//! CLI manifest parsing) and consumed read-only by the download pipeline. The
//! one exception is [`ProcessingResult`], which the pipeline produces.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Ranked audio fidelity tier.
///
/// The single canonical ranking table: `rank()` is the only place quality
/// tiers are compared, and every provider string spelling normalizes into
/// these four variants on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// ~96 kbps lossy.
    #[serde(rename = "LOW", alias = "LOW_96K")]
    Low96,
    /// ~320 kbps lossy.
    #[serde(rename = "HIGH", alias = "LOW_320K")]
    Low320,
    /// CD-quality lossless.
    #[serde(rename = "LOSSLESS")]
    Lossless,
    /// Above-CD-resolution lossless.
    #[serde(rename = "HI_RES_LOSSLESS", alias = "HI_RES")]
    HiResLossless,
}

impl Quality {
    /// Total order used for upgrade decisions: a track is re-downloaded only
    /// when the newly available rank strictly exceeds the stored one.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low96 => 0,
            Self::Low320 => 1,
            Self::Lossless => 2,
            Self::HiResLossless => 3,
        }
    }

    /// Canonical provider spelling, used for persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low96 => "LOW",
            Self::Low320 => "HIGH",
            Self::Lossless => "LOSSLESS",
            Self::HiResLossless => "HI_RES_LOSSLESS",
        }
    }

    /// Parses a stored or provider quality string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" | "LOW_96K" => Some(Self::Low96),
            "HIGH" | "LOW_320K" => Some(Self::Low320),
            "LOSSLESS" => Some(Self::Lossless),
            "HI_RES_LOSSLESS" | "HI_RES" => Some(Self::HiResLossless),
            _ => None,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved fetch instructions for one track, produced by the catalog
/// collaborator.
///
/// `urls` is never empty: one URL means a single-file download, more than one
/// means a segmented stream reassembled by ascending segment index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Ordered fetch locations.
    pub urls: Vec<String>,
    /// Whether segment payloads are encrypted with a per-track token.
    #[serde(default)]
    pub is_encrypted: bool,
    /// Opaque security token; present only when `is_encrypted`.
    #[serde(default)]
    pub encryption_token: Option<String>,
    /// Container extension asserted by the manifest (without leading dot).
    /// Authoritative for naming.
    pub declared_extension: String,
    /// Independently computed extension from quality/codec hints. Used only
    /// as a cross-check diagnostic, never as ground truth.
    pub predicted_extension: String,
    /// True when the manifest indicates a codec misboxed in a container that
    /// cannot carry rich tags for it (lossless stream in a generic MP4 box).
    #[serde(default)]
    pub needs_codec_extraction: bool,
    /// Quality tier this descriptor was resolved at.
    pub quality: Quality,
}

impl StreamDescriptor {
    /// Whether this descriptor represents a segmented (DASH-style) stream.
    #[must_use]
    pub fn is_segmented(&self) -> bool {
        self.urls.len() > 1
    }
}

/// Caller-supplied tag data for the finished file. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioIdentity {
    pub title: String,
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub isrc: String,
    /// Track length in seconds.
    #[serde(default)]
    pub duration_secs: u32,
    /// Full release date (`YYYY-MM-DD`) when known.
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub release_year: Option<u32>,
    /// Raw cover image bytes; format detected from magic bytes at embed time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<Vec<u8>>,
    /// Beats per minute, when the catalog supplies it.
    #[serde(default)]
    pub bpm: Option<u16>,
}

impl AudioIdentity {
    /// All artists joined with the tag separator used across formats.
    #[must_use]
    pub fn joined_artists(&self) -> String {
        self.artists.join("; ")
    }

    /// Filesystem-safe `Artist - Title` stem for the destination file.
    #[must_use]
    pub fn safe_name(&self) -> String {
        let artist = self.artists.first().map_or("Unknown Artist", String::as_str);
        format!("{artist} - {}", self.title)
            .replace(['/', '\\'], "_")
            .trim()
            .to_string()
    }
}

/// One unit of work for the batch layer: a track identifier plus the identity
/// to stamp on the finished file and the quality tier to request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRequest {
    pub track_id: String,
    pub identity: AudioIdentity,
    pub quality: Quality,
}

/// Classified cause of a failed track, one per [`ProcessingResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Stream resolution yielded nothing in any quality.
    Unavailable,
    /// Fetch failures that exhausted the retry bound.
    Network,
    /// Bad token or key material.
    Crypto,
    /// Missing or corrupt segments.
    Assembly,
    /// Container rewrap produced no output.
    Extraction,
    /// Relocation into the destination failed.
    Finalize,
    /// Abort signal observed.
    Cancelled,
    /// Could not allocate the per-track scratch directory.
    Workspace,
}

/// Terminal per-track outcome returned to the batch layer.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub success: bool,
    pub final_path: Option<PathBuf>,
    pub failure: Option<FailureKind>,
}

impl ProcessingResult {
    /// A finished (or skippable) track.
    #[must_use]
    pub fn ok(final_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            final_path,
            failure: None,
        }
    }

    /// A failed track with its classified cause.
    #[must_use]
    pub fn failed(kind: FailureKind) -> Self {
        Self {
            success: false,
            final_path: None,
            failure: Some(kind),
        }
    }
}
