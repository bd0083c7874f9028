//! trackdl Core Library
//!
//! The pipeline takes a track request, resolves it to a stream descriptor,
//! downloads the stream (single file or DASH segments), decrypts it when a
//! key token is present, merges segments in order, inspects the container,
//! losslessly extracts FLAC out of MP4 when needed, and finalizes the
//! tagged file into the library directory. [`batch::BatchOrchestrator`]
//! drives the whole thing for many tracks at once.
//!
//! # Architecture
//!
//! - [`model`] - Stream descriptors, quality tiers, track identities
//! - [`crypto`] - Security token unwrap and payload decryption
//! - [`download`] - Streaming HTTP fetch with retries and pacing
//! - [`assemble`] - Segment fan-out, decryption and ordered merge
//! - [`media`] - Container probing and lossless codec extraction
//! - [`finalize`] - Atomic relocation into the library plus tagging
//! - [`tags`] - Multi-format metadata and cover art writing
//! - [`store`] - Download history (SQLite or in-memory)
//! - [`batch`] - Batched orchestration with pause/resume/stop

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assemble;
pub mod batch;
pub mod config;
pub mod crypto;
pub mod download;
pub mod finalize;
pub mod media;
pub mod model;
pub mod resolver;
pub mod signals;
pub mod store;
pub mod tags;
pub mod workspace;

pub use batch::{build_orchestrator, BatchOrchestrator};
pub use config::DownloadConfig;
pub use model::{AudioIdentity, ProcessingResult, Quality, StreamDescriptor, TrackRequest};
pub use signals::ControlSignals;
