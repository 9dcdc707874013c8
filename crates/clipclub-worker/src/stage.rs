//! Job lifecycle stages and the allowed status transitions.

use clipclub_models::JobStatus;

/// Work a job goes through after being picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Download,
    Render,
    Upload,
}

impl JobStage {
    pub const ORDER: [JobStage; 3] = [JobStage::Download, JobStage::Render, JobStage::Upload];

    /// Status persisted while this stage runs.
    pub fn status(&self) -> JobStatus {
        match self {
            JobStage::Download => JobStatus::Downloading,
            JobStage::Render => JobStatus::Rendering,
            JobStage::Upload => JobStatus::Uploading,
        }
    }

    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Download => Some(JobStage::Render),
            JobStage::Render => Some(JobStage::Upload),
            JobStage::Upload => None,
        }
    }
}

/// Whether `from -> to` is a legal persisted transition.
///
/// Statuses only move forward one step at a time; any non-terminal status may
/// fail. Terminal statuses never change.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        (Pending, Downloading)
        | (Downloading, Rendering)
        | (Rendering, Uploading)
        | (Uploading, Complete) => true,
        (from, Failed(_)) => !from.is_terminal(),
        _ => false,
    }
}
