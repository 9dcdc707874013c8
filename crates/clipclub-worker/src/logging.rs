//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use clipclub_models::{JobId, JobStatus};

/// Job logger for structured logging with consistent formatting.
///
/// Every event carries the job ID and operation so a job's lifecycle can be
/// filtered out of the worker's log stream.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: JobId, operation: &str) -> Self {
        Self {
            job_id,
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log a persisted status change.
    pub fn log_transition(&self, from: &JobStatus, to: &JobStatus) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            from = %from,
            to = %to,
            "Job status changed"
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a warning during job execution.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    /// Log an error during job execution, with encoder output when present.
    pub fn log_error(&self, message: &str, diagnostic: Option<&str>) {
        match diagnostic {
            Some(diagnostic) => error!(
                job_id = %self.job_id,
                operation = %self.operation,
                diagnostic = %diagnostic,
                "Job error: {}", message
            ),
            None => error!(
                job_id = %self.job_id,
                operation = %self.operation,
                "Job error: {}", message
            ),
        }
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    /// Get the job ID.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Get the operation type.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
