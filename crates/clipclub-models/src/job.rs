//! Compilation job definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{JobStatus, ManifestEntry, SelectionMethod};

/// Row ID of a compilation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A compilation request as persisted in the job table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompilationJob {
    /// Unique job ID
    pub id: JobId,

    /// Channel login name
    pub channel: String,

    /// Number of clips to compile
    pub count: u32,

    /// Clip selection method
    pub method: SelectionMethod,

    /// Look-back window in days
    pub range: u32,

    /// Current status
    #[schemars(with = "String")]
    pub status: JobStatus,

    /// Ordered manifest, present once the download stage finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Vec<ManifestEntry>>,

    /// Reference to the submitting session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<String>,
}

/// Reasons a compilation request is rejected at submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobRequestError {
    #[error("channel name must be {min}-{max} characters, got {len}")]
    ChannelLength { len: usize, min: usize, max: usize },

    #[error("clip count must be between {min} and {max}, got {count}")]
    Count { count: u32, min: u32, max: u32 },

    #[error("range must be between {min} and {max} days, got {range}")]
    Range { range: u32, min: u32, max: u32 },
}

/// A compilation request that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NewCompilationJob {
    pub channel: String,
    pub count: u32,
    pub method: SelectionMethod,
    pub range: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<String>,
}

impl NewCompilationJob {
    pub const CHANNEL_LEN: (usize, usize) = (3, 25);
    pub const COUNT: (u32, u32) = (2, 10);
    pub const RANGE_DAYS: (u32, u32) = (1, 365);

    /// Create a new request.
    pub fn new(channel: impl Into<String>, count: u32, method: SelectionMethod, range: u32) -> Self {
        Self {
            channel: channel.into(),
            count,
            method,
            range,
            owner_ref: None,
        }
    }

    /// Attach the submitting session.
    pub fn with_owner(mut self, owner_ref: impl Into<String>) -> Self {
        self.owner_ref = Some(owner_ref.into());
        self
    }

    /// Check the request bounds.
    ///
    /// At least two clips are required since a compilation is built from
    /// crossfades between consecutive clips.
    pub fn validate(&self) -> Result<(), JobRequestError> {
        let len = self.channel.chars().count();
        let (min, max) = Self::CHANNEL_LEN;
        if !(min..=max).contains(&len) {
            return Err(JobRequestError::ChannelLength { len, min, max });
        }

        let (min, max) = Self::COUNT;
        if !(min..=max).contains(&self.count) {
            return Err(JobRequestError::Count {
                count: self.count,
                min,
                max,
            });
        }

        let (min, max) = Self::RANGE_DAYS;
        if !(min..=max).contains(&self.range) {
            return Err(JobRequestError::Range {
                range: self.range,
                min,
                max,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let req = NewCompilationJob::new("ironmouse", 10, SelectionMethod::Popular, 7)
            .with_owner("session-abc");
        assert!(req.validate().is_ok());
        assert_eq!(req.owner_ref.as_deref(), Some("session-abc"));
    }

    #[test]
    fn test_request_bounds() {
        let short = NewCompilationJob::new("ab", 5, SelectionMethod::Popular, 7);
        assert!(matches!(
            short.validate(),
            Err(JobRequestError::ChannelLength { len: 2, .. })
        ));

        let single = NewCompilationJob::new("henyathegenius", 1, SelectionMethod::Random, 30);
        assert!(matches!(single.validate(), Err(JobRequestError::Count { count: 1, .. })));

        let long_range = NewCompilationJob::new("henyathegenius", 3, SelectionMethod::Random, 400);
        assert!(matches!(
            long_range.validate(),
            Err(JobRequestError::Range { range: 400, .. })
        ));
    }

    #[test]
    fn test_job_serializes_status_as_code() {
        let job = CompilationJob {
            id: JobId(7),
            channel: "ironmouse".into(),
            count: 3,
            method: SelectionMethod::Popular,
            range: 7,
            status: JobStatus::Pending,
            manifest: None,
            owner_ref: None,
        };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["method"], "popular");
        assert!(json.get("manifest").is_none());
    }
}
