#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and compilation rendering.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building behind the [`Encoder`] seam
//! - Progress parsing from `-progress pipe:2`
//! - Clip probing behind the [`Prober`] seam
//! - Crossfade and title card filter graph generation
//! - The staged [`CompositionOrchestrator`]

pub mod command;
pub mod compose;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod manifest;
pub mod probe;
pub mod progress;
pub mod title;

pub use command::{check_ffmpeg, check_ffprobe, Encoder, FfmpegCommand, FfmpegRunner};
pub use compose::{majority_format, CompositionConfig, CompositionOrchestrator, TargetFormat};
pub use error::{
    CompositionError, CompositionResult, GraphError, MediaError, MediaResult, RenderStage,
};
pub use filters::{
    build_audio_graph, build_video_graph, parse_graph, AudioCurves, FadeEdge, FadeKind,
    GraphStatement, AUDIO_LABEL, VIDEO_LABEL,
};
pub use manifest::{build_manifest, manifest_entry};
pub use probe::{parse_frame_rate, FfprobeProber, ProbeResult, Prober};
pub use progress::FfmpegProgress;
pub use title::{build_title_card_graph, title_card_command, TitleStyle};
