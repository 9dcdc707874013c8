//! Compilation manifest.
//!
//! A manifest is the ordered list of clips that make up one compilation.
//! Order is presentation order and is preserved from download through render.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ClipDescriptor;

/// One clip of a compilation, with its probed stream properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestEntry {
    /// Source media file
    pub file: PathBuf,
    /// Multi-line title card caption (may be empty)
    pub text: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Duration in seconds
    pub duration: f64,
    /// Frame rate (fps)
    pub fps: f64,
}

impl ManifestEntry {
    /// `(width, height)` pair.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Build the title card caption for a clip.
///
/// Three lines: title, clipper with the creation date, view count.
pub fn caption_text(clip: &ClipDescriptor) -> String {
    format!(
        "{}\nClipped by {} on {}\n{} views",
        clip.title,
        clip.creator_display_name,
        format_long_date(&clip.creation_date),
        clip.views
    )
}

fn format_long_date(date: &DateTime<Utc>) -> String {
    // e.g. "April 3, 2003"
    date.format("%B %-d, %Y").to_string()
}
