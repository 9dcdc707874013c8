//! Error types for media operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use clipclub_models::FailureCode;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running ffmpeg/ffprobe.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("FFmpeg exited cleanly but did not write {0}")]
    MissingOutput(PathBuf),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Diagnostic output captured from the external process, verbatim.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }
}

/// Precondition failures raised while building filter graphs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("a crossfade graph needs at least 2 clips, got {count}")]
    InsufficientClips { count: usize },

    #[error("clip {file} has invalid duration {duration}; it must be positive and longer than the crossfade")]
    InvalidDuration { file: PathBuf, duration: f64 },
}

/// Composition pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    /// Rescale clips that do not match the majority resolution
    Reconcile,
    RenderTitles,
    RenderTitlesMerge,
    RenderVideo,
    RenderAudio,
    RenderCombine,
}

impl RenderStage {
    pub const ORDER: [RenderStage; 6] = [
        RenderStage::Reconcile,
        RenderStage::RenderTitles,
        RenderStage::RenderTitlesMerge,
        RenderStage::RenderVideo,
        RenderStage::RenderAudio,
        RenderStage::RenderCombine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::Reconcile => "reconcile",
            RenderStage::RenderTitles => "render_titles",
            RenderStage::RenderTitlesMerge => "render_titles_merge",
            RenderStage::RenderVideo => "render_video",
            RenderStage::RenderAudio => "render_audio",
            RenderStage::RenderCombine => "render_combine",
        }
    }

    /// The stage that runs after this one, if any.
    pub fn next(&self) -> Option<RenderStage> {
        let idx = Self::ORDER.iter().position(|s| s == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    /// Persisted failure code for a fault in this stage.
    ///
    /// Reconciliation produces the clips the base video is built from, so
    /// its faults are reported as base video failures.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            RenderStage::Reconcile | RenderStage::RenderVideo => FailureCode::RenderVideoFailed,
            RenderStage::RenderTitles => FailureCode::RenderTitlesFailed,
            RenderStage::RenderTitlesMerge => FailureCode::RenderTitlesMergeFailed,
            RenderStage::RenderAudio => FailureCode::RenderAudioFailed,
            RenderStage::RenderCombine => FailureCode::RenderCombineFailed,
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for the composition pipeline.
pub type CompositionResult<T> = Result<T, CompositionError>;

/// Errors raised by the composition pipeline.
#[derive(Debug, Error)]
pub enum CompositionError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: RenderStage,
        #[source]
        source: MediaError,
    },

    #[error("failed to prepare work directory: {0}")]
    Workspace(#[source] std::io::Error),
}

impl CompositionError {
    pub fn stage(stage: RenderStage, source: impl Into<MediaError>) -> Self {
        Self::Stage {
            stage,
            source: source.into(),
        }
    }

    /// Stage the error was raised in, if it came from an encode stage.
    pub fn render_stage(&self) -> Option<RenderStage> {
        match self {
            CompositionError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Encoder diagnostic output, verbatim.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            CompositionError::Stage { source, .. } => source.diagnostic(),
            _ => None,
        }
    }
}
