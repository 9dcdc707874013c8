//! Job repository contract.

use async_trait::async_trait;

use clipclub_models::{CompilationJob, JobId, JobStatus, ManifestEntry, NewCompilationJob};

use crate::error::StoreResult;

/// Persistence for compilation jobs.
///
/// Jobs are never deleted. Only the job executor changes `status`, and the
/// manifest is written once.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Validate and insert a request as a `pending` job.
    async fn create(&self, request: &NewCompilationJob) -> StoreResult<CompilationJob>;

    /// Fetch a job by ID.
    async fn get(&self, id: JobId) -> StoreResult<Option<CompilationJob>>;

    /// The oldest `pending` job, if any.
    async fn next_pending(&self) -> StoreResult<Option<CompilationJob>>;

    /// Persist a status transition.
    async fn set_status(&self, id: JobId, status: JobStatus) -> StoreResult<()>;

    /// Persist the manifest produced by the download stage.
    async fn set_manifest(&self, id: JobId, manifest: &[ManifestEntry]) -> StoreResult<()>;

    /// Return jobs parked in an in-flight status to `pending`.
    ///
    /// Returns the number of jobs requeued.
    async fn reset_interrupted(&self) -> StoreResult<usize>;
}
