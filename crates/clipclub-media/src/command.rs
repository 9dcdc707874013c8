//! FFmpeg command builder and runner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{FfmpegProgress, StderrLine, StderrSplitter};

/// Maximum number of diagnostic lines kept from ffmpeg's stderr.
const MAX_DIAGNOSTIC_LINES: usize = 200;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Expected output duration, used for progress reporting
    expected_duration: Option<f64>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            expected_duration: None,
        }
    }

    /// Append an input file.
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    /// Append input files in order.
    pub fn inputs<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |cmd, p| cmd.input(p))
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Select a stream for the output, e.g. `[video]` or `2:a`.
    pub fn map(self, selector: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(selector)
    }

    /// Select a labelled filter graph output.
    pub fn map_label(self, label: &str) -> Self {
        self.map(format!("[{}]", label))
    }

    /// Force constant frame rate output.
    pub fn constant_frame_rate(self) -> Self {
        self.output_arg("-fps_mode").output_arg("cfr")
    }

    /// Set output pixel format.
    pub fn pixel_format(self, pix_fmt: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(pix_fmt)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Expected output duration in seconds (progress reporting only).
    pub fn expected_duration(mut self, seconds: f64) -> Self {
        self.expected_duration = Some(seconds);
        self
    }

    /// Output file path.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Input file paths in order.
    pub fn input_paths(&self) -> impl Iterator<Item = &Path> {
        self.inputs.iter().map(PathBuf::as_path)
    }

    /// The `-filter_complex` argument, if set.
    pub fn filter_graph(&self) -> Option<&str> {
        self.output_args
            .iter()
            .position(|a| a == "-filter_complex")
            .and_then(|idx| self.output_args.get(idx + 1))
            .map(String::as_str)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        // Overwrite flag
        if self.overwrite {
            args.push("-y".to_string());
        }

        // Log level
        args.push("-v".to_string());
        args.push("error".to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Something that can execute an encode.
///
/// The composition pipeline receives one of these instead of spawning
/// processes itself, so tests can substitute a recording fake.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Run the command to completion.
    ///
    /// Returns an error on non-zero exit or when the output file is absent.
    async fn encode(&self, cmd: &FfmpegCommand) -> MediaResult<()>;
}

/// Runs FFmpeg commands as child processes.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    /// Locate `ffmpeg` in PATH.
    pub fn new() -> MediaResult<Self> {
        Ok(Self {
            binary: check_ffmpeg()?,
        })
    }

    /// Use an explicit ffmpeg binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;
        let mut reader = BufReader::new(stderr).lines();
        let expected_ms = cmd.expected_duration.map(|s| (s * 1000.0) as i64);

        // Progress lines are consumed; everything else is diagnostic output
        let stderr_handle = tokio::spawn(async move {
            let mut splitter = StderrSplitter::new();
            let mut diagnostics: Vec<String> = Vec::new();

            while let Ok(Some(line)) = reader.next_line().await {
                match splitter.feed(&line) {
                    StderrLine::Progress(Some(progress)) => log_progress(&progress, expected_ms),
                    StderrLine::Progress(None) => {}
                    StderrLine::Diagnostic(text) => {
                        if diagnostics.len() < MAX_DIAGNOSTIC_LINES {
                            diagnostics.push(text);
                        }
                    }
                }
            }

            diagnostics
        });

        let status = child.wait().await?;
        let diagnostics = stderr_handle.await.unwrap_or_default();

        if !status.success() {
            let stderr = (!diagnostics.is_empty()).then(|| diagnostics.join("\n"));
            warn!(
                exit_code = ?status.code(),
                output = %cmd.output().display(),
                "FFmpeg exited with non-zero status"
            );
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                stderr,
                status.code(),
            ));
        }

        if !tokio::fs::try_exists(cmd.output()).await.unwrap_or(false) {
            return Err(MediaError::MissingOutput(cmd.output().to_path_buf()));
        }

        Ok(())
    }
}

#[async_trait]
impl Encoder for FfmpegRunner {
    async fn encode(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run(cmd).await
    }
}

fn log_progress(progress: &FfmpegProgress, expected_ms: Option<i64>) {
    match expected_ms {
        Some(total) => debug!(
            frame = progress.frame,
            speed = progress.speed,
            percent = progress.percentage(total),
            eta_secs = ?progress.eta_seconds(total),
            "FFmpeg progress"
        ),
        None => debug!(
            frame = progress.frame,
            speed = progress.speed,
            out_time = %progress.out_time,
            "FFmpeg progress"
        ),
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
