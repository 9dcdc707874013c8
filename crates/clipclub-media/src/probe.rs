//! FFprobe clip metadata.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Stream properties needed to compose a clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Duration in seconds (0.0 when the container reports none)
    pub duration_seconds: f64,
    /// Frame rate (fps)
    pub fps: f64,
}

/// Something that can read clip metadata.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<ProbeResult>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probes files with the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    /// Locate `ffprobe` in PATH.
    pub fn new() -> MediaResult<Self> {
        Ok(Self {
            binary: check_ffprobe()?,
        })
    }

    /// Use an explicit ffprobe binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> MediaResult<ProbeResult> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        debug!(file = %path.display(), "Probing clip");

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe failed on {}", path.display()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        parse_probe_output(&output.stdout)
    }
}

/// Extract a [`ProbeResult`] from ffprobe's JSON.
///
/// The first video stream supplies the dimensions and frame rate; the
/// stream duration is preferred over the container duration.
fn parse_probe_output(json: &[u8]) -> MediaResult<ProbeResult> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let duration_seconds = video_stream
        .duration
        .as_deref()
        .or_else(|| probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video_stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| {
            MediaError::InvalidVideo(format!(
                "unreadable frame rate {:?}",
                video_stream.r_frame_rate
            ))
        })?;

    Ok(ProbeResult {
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        duration_seconds,
        fps,
    })
}

/// Parse frame rate string (e.g., "30/1", "30000/1001" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.trim().parse().ok()
}
