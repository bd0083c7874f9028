//! Container inspection and lossless codec extraction.

mod extract;
mod probe;

pub use extract::{extract_flac, ExtractionError};
pub use probe::{probe, ProbeReport, EXPECTED_CODECS};
