//! Clip descriptors and selection methods.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A short clip as listed by the clip catalog.
///
/// Field names follow the catalog's camelCase JSON so channel catalog files can be
/// deserialized directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClipDescriptor {
    /// Catalog clip ID (also the downloaded file stem)
    pub id: String,

    /// Clip title as entered by the clipper
    pub title: String,

    /// Display name of the user who created the clip
    pub creator_display_name: String,

    /// View count at fetch time
    #[serde(default)]
    pub views: u64,

    /// When the clip was created
    pub creation_date: DateTime<Utc>,

    /// Page URL handed to the downloader
    #[serde(default)]
    pub url: String,

    /// Local file once downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_path: Option<PathBuf>,
}

impl ClipDescriptor {
    /// Return a copy pointing at a downloaded file.
    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file_path = Some(path.into());
        self
    }
}

/// How clips are picked from the catalog listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Most viewed first
    #[default]
    Popular,
    /// Uniformly shuffled
    Random,
}

impl SelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMethod::Popular => "popular",
            SelectionMethod::Random => "random",
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SelectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "popular" => Ok(SelectionMethod::Popular),
            "random" => Ok(SelectionMethod::Random),
            other => Err(format!("unknown selection method: {}", other)),
        }
    }
}
