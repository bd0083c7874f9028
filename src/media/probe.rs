//! Container and codec inspection via `ffprobe`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// ffprobe invocations are bounded so a hung binary cannot stall a track.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Codecs the upstream catalog is known to serve.
pub const EXPECTED_CODECS: &[&str] = &["aac", "flac", "alac"];

/// What `ffprobe` reported about a file. Fields are empty when probing
/// failed or the tool is not installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// First audio stream codec, lowercased (e.g. `flac`, `aac`).
    pub codec: String,
    /// Container format name, lowercased (e.g. `mov,mp4,m4a,3gp,3g2,mj2`).
    pub container: String,
}

impl ProbeReport {
    /// True when the codec is one the pipeline knows how to handle.
    #[must_use]
    pub fn codec_is_expected(&self) -> bool {
        EXPECTED_CODECS.contains(&self.codec.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
}

/// Inspects `path` with `ffprobe`.
///
/// Probing is advisory: any failure (missing binary, timeout, non-zero
/// exit, unparseable JSON) is logged and produces an empty report rather
/// than failing the track.
pub async fn probe(path: &Path) -> ProbeReport {
    let invocation = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-show_entries",
            "format=format_name:stream=codec_name",
            "-of",
            "json",
        ])
        .arg(path)
        .output();

    let output = match tokio::time::timeout(PROBE_TIMEOUT, invocation).await {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => {
            warn!(error = %error, "ffprobe unavailable, skipping inspection");
            return ProbeReport::default();
        }
        Err(_) => {
            warn!(path = %path.display(), "ffprobe timed out");
            return ProbeReport::default();
        }
    };

    if !output.status.success() {
        warn!(path = %path.display(), status = ?output.status.code(), "ffprobe failed");
        return ProbeReport::default();
    }

    match serde_json::from_slice::<FfprobeOutput>(&output.stdout) {
        Ok(parsed) => {
            let report = ProbeReport {
                codec: parsed
                    .streams
                    .first()
                    .and_then(|s| s.codec_name.as_deref())
                    .unwrap_or_default()
                    .to_lowercase(),
                container: parsed
                    .format
                    .and_then(|f| f.format_name)
                    .unwrap_or_default()
                    .to_lowercase(),
            };
            debug!(codec = %report.codec, container = %report.container, "probed file");
            report
        }
        Err(error) => {
            warn!(error = %error, "ffprobe output was not valid JSON");
            ProbeReport::default()
        }
    }
}
