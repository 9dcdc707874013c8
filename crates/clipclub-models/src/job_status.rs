//! Persisted compilation job status.
//!
//! The status column holds either a lifecycle state (`pending`, `downloading`,
//! `rendering`, `uploading`, `complete`) or one of the upper-case terminal
//! failure codes. The string forms are a stable contract with the web
//! frontend that polls job progress.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Terminal failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// The channel has fewer clips in range than requested
    NotEnoughClips,
    /// The channel name did not resolve
    ChannelNotFound,
    /// Fetching or probing the clip files failed
    DownloadFailed,
    RenderTitlesFailed,
    RenderTitlesMergeFailed,
    RenderVideoFailed,
    RenderAudioFailed,
    RenderCombineFailed,
}

impl FailureCode {
    pub const ALL: [FailureCode; 8] = [
        FailureCode::NotEnoughClips,
        FailureCode::ChannelNotFound,
        FailureCode::DownloadFailed,
        FailureCode::RenderTitlesFailed,
        FailureCode::RenderTitlesMergeFailed,
        FailureCode::RenderVideoFailed,
        FailureCode::RenderAudioFailed,
        FailureCode::RenderCombineFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::NotEnoughClips => "LTMINCLIPS",
            FailureCode::ChannelNotFound => "CHANNELNOTFOUND",
            FailureCode::DownloadFailed => "DOWNLOADFAILED",
            FailureCode::RenderTitlesFailed => "RENDERTITLESFAILED",
            FailureCode::RenderTitlesMergeFailed => "RENDERTITLESMERGEFAILED",
            FailureCode::RenderVideoFailed => "RENDERVIDEOFAILED",
            FailureCode::RenderAudioFailed => "RENDERAUDIOFAILED",
            FailureCode::RenderCombineFailed => "RENDERCOMBINEFAILED",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compilation job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum JobStatus {
    /// Submitted, waiting for the worker
    #[default]
    Pending,
    /// Fetching clip list and clip files
    Downloading,
    /// Encoding the compilation
    Rendering,
    /// Handing the compilation off for delivery
    Uploading,
    /// Delivered
    Complete,
    /// Ended with a failure code
    Failed(FailureCode),
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Rendering => "rendering",
            JobStatus::Uploading => "uploading",
            JobStatus::Complete => "complete",
            JobStatus::Failed(code) => code.as_str(),
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed(_))
    }

    /// Statuses a job sits in while the worker is actively driving it.
    ///
    /// A job found in one of these with no worker running was interrupted.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobStatus::Downloading | JobStatus::Rendering | JobStatus::Uploading
        )
    }

    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            JobStatus::Failed(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A status string that is neither a lifecycle state nor a failure code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => JobStatus::Pending,
            "downloading" => JobStatus::Downloading,
            "rendering" => JobStatus::Rendering,
            "uploading" => JobStatus::Uploading,
            "complete" => JobStatus::Complete,
            other => FailureCode::ALL
                .iter()
                .find(|code| code.as_str() == other)
                .map(|code| JobStatus::Failed(*code))
                .ok_or_else(|| UnknownStatus(other.to_string()))?,
        };
        Ok(status)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        let lifecycle = [
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::Rendering,
            JobStatus::Uploading,
            JobStatus::Complete,
        ];
        for status in lifecycle
            .into_iter()
            .chain(FailureCode::ALL.into_iter().map(JobStatus::Failed))
        {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_failure_code_strings() {
        assert_eq!(FailureCode::NotEnoughClips.as_str(), "LTMINCLIPS");
        assert_eq!(FailureCode::ChannelNotFound.as_str(), "CHANNELNOTFOUND");
        assert_eq!(
            JobStatus::Failed(FailureCode::RenderTitlesMergeFailed).to_string(),
            "RENDERTITLESMERGEFAILED"
        );
    }

    #[test]
    fn test_terminal_and_in_flight() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Pending.is_in_flight());
        assert!(JobStatus::Rendering.is_in_flight());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed(FailureCode::DownloadFailed).is_terminal());
        assert!(!JobStatus::Failed(FailureCode::DownloadFailed).is_in_flight());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert_eq!(
            "finished".parse::<JobStatus>(),
            Err(UnknownStatus("finished".into()))
        );
    }

    #[test]
    fn test_status_serde_as_plain_string() {
        let json = serde_json::to_string(&JobStatus::Failed(FailureCode::NotEnoughClips)).unwrap();
        assert_eq!(json, "\"LTMINCLIPS\"");
        let back: JobStatus = serde_json::from_str("\"uploading\"").unwrap();
        assert_eq!(back, JobStatus::Uploading);
    }
}
