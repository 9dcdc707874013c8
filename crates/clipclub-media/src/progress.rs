//! FFmpeg `-progress pipe:2` parsing.
//!
//! ffmpeg interleaves its progress key/value lines with its own log output on
//! stderr. [`StderrSplitter`] separates the two so progress can be traced and
//! the remaining lines kept as the encode's diagnostic output.

/// Progress snapshot from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }

    /// Estimated seconds remaining.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Keys emitted by `-progress`.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum StderrLine {
    /// A progress key; carries a snapshot when the block is complete
    Progress(Option<FfmpegProgress>),
    /// Anything else ffmpeg printed
    Diagnostic(String),
}

/// Stateful splitter for ffmpeg's stderr stream.
#[derive(Debug, Default)]
pub struct StderrSplitter {
    current: FfmpegProgress,
}

impl StderrSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a line, folding progress keys into the running snapshot.
    pub fn feed(&mut self, line: &str) -> StderrLine {
        let trimmed = line.trim();
        let Some((key, value)) = trimmed.split_once('=') else {
            return StderrLine::Diagnostic(line.to_string());
        };
        if !(PROGRESS_KEYS.contains(&key) || key.starts_with("stream_")) {
            return StderrLine::Diagnostic(line.to_string());
        }

        match key {
            // Both keys carry microseconds in practice
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "out_time" => self.current.out_time = value.to_string(),
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.current.fps = fps;
                }
            }
            "speed" => {
                // "1.5x" or "N/A"
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                if value == "end" {
                    self.current.is_complete = true;
                }
                return StderrLine::Progress(Some(self.current.clone()));
            }
            _ => {}
        }

        StderrLine::Progress(None)
    }
}
