//! Metadata tagging across MP4, FLAC and ID3 containers.
//!
//! The container family is decided from magic bytes rather than the file
//! extension, since extraction and rewrap steps can leave either accurate
//! or merely predicted extensions behind.

use std::io;
use std::path::Path;

use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::tag::{ItemKey, Tag, TagType};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::AudioIdentity;

/// The three container families the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFamily {
    /// MP4/M4A boxes, tagged with an `ilst` atom.
    Mp4,
    /// Native FLAC, tagged with Vorbis comments.
    Flac,
    /// MP3-style streams, tagged with ID3v2.
    Id3,
}

impl ContainerFamily {
    fn tag_type(self) -> TagType {
        match self {
            Self::Mp4 => TagType::Mp4Ilst,
            Self::Flac => TagType::VorbisComments,
            Self::Id3 => TagType::Id3v2,
        }
    }
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("could not read file header: {0}")]
    Io(#[from] io::Error),

    #[error("tag write failed: {0}")]
    Lofty(#[from] lofty::error::LoftyError),

    #[error("unrecognized container, cannot tag")]
    Unsupported,
}

/// Decides the container family from the leading bytes of a file.
fn sniff_family(header: &[u8]) -> Option<ContainerFamily> {
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return Some(ContainerFamily::Mp4);
    }
    if header.starts_with(b"fLaC") {
        return Some(ContainerFamily::Flac);
    }
    if header.starts_with(b"ID3") {
        return Some(ContainerFamily::Id3);
    }
    if header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
        return Some(ContainerFamily::Id3);
    }
    None
}

/// Decides the MIME type of cover art from its magic bytes.
fn sniff_image_mime(data: &[u8]) -> MimeType {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        MimeType::Jpeg
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        MimeType::Png
    } else if data.starts_with(b"GIF8") {
        MimeType::Gif
    } else if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        MimeType::Unknown("image/x-icon".to_owned())
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        MimeType::Unknown("image/webp".to_owned())
    } else {
        // Upstream cover endpoints overwhelmingly serve JPEG.
        MimeType::Jpeg
    }
}

/// Writes title, artists, album, dates, ISRC, length, BPM and cover art
/// into `path` using the tag format its container natively carries.
///
/// # Errors
///
/// Returns [`TagError`] when the header cannot be read, the container is
/// not one of the supported families, or the tag write fails.
#[instrument(skip(identity), fields(path = %path.display(), title = %identity.title))]
pub fn write_tags(path: &Path, identity: &AudioIdentity) -> Result<(), TagError> {
    let family = {
        use std::io::Read;
        let mut header = [0u8; 12];
        let mut file = std::fs::File::open(path)?;
        let read = file.read(&mut header)?;
        sniff_family(&header[..read])
    };

    // No magic matched: let lofty take its own guess at the file type.
    let tag_type = match family {
        Some(family) => family.tag_type(),
        None => lofty::probe::Probe::open(path)?
            .guess_file_type()?
            .file_type()
            .ok_or(TagError::Unsupported)?
            .primary_tag_type(),
    };
    debug!(?tag_type, "writing tags");

    let mut tag = Tag::new(tag_type);
    tag.set_title(identity.title.clone());
    tag.set_artist(identity.joined_artists());
    tag.set_album(identity.album.clone());

    if let Some(year) = identity.release_year {
        tag.set_year(year);
    }
    if let Some(date) = &identity.release_date {
        tag.insert_text(ItemKey::RecordingDate, date.clone());
    }
    if !identity.isrc.is_empty() {
        tag.insert_text(ItemKey::Isrc, identity.isrc.clone());
    }
    if identity.duration_secs > 0 {
        tag.insert_text(
            ItemKey::Length,
            (u64::from(identity.duration_secs) * 1000).to_string(),
        );
    }
    if let Some(bpm) = identity.bpm {
        tag.insert_text(ItemKey::Bpm, bpm.to_string());
    }

    if let Some(cover) = &identity.cover {
        let mime = sniff_image_mime(cover);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            cover.clone(),
        ));
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}
