//! Hand-off of finished compilations.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use clipclub_media::fs_utils::copy_atomic;
use clipclub_models::CompilationJob;

use crate::error::{WorkerError, WorkerResult};

/// Destination for rendered compilations.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Publish `rendered` for `job`; returns where it ended up.
    async fn deliver(&self, job: &CompilationJob, rendered: &Path) -> WorkerResult<PathBuf>;
}

/// Copies compilations into a local directory.
#[derive(Debug, Clone)]
pub struct LocalDelivery {
    dir: PathBuf,
}

impl LocalDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn destination(&self, job: &CompilationJob) -> PathBuf {
        self.dir.join(format!("compilation_{}.mp4", job.id))
    }
}

#[async_trait]
impl Delivery for LocalDelivery {
    async fn deliver(&self, job: &CompilationJob, rendered: &Path) -> WorkerResult<PathBuf> {
        let dst = self.destination(job);
        copy_atomic(rendered, &dst)
            .await
            .map_err(WorkerError::Delivery)?;
        info!(job_id = %job.id, "Delivered {}", dst.display());
        Ok(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipclub_models::{JobId, JobStatus, SelectionMethod};
    use tempfile::TempDir;

    fn job(id: i64) -> CompilationJob {
        CompilationJob {
            id: JobId(id),
            channel: "ironmouse".into(),
            count: 3,
            method: SelectionMethod::Popular,
            range: 7,
            status: JobStatus::Uploading,
            manifest: None,
            owner_ref: None,
        }
    }

    #[tokio::test]
    async fn test_local_delivery_copies() {
        let dir = TempDir::new().unwrap();
        let rendered = dir.path().join("render.mp4");
        tokio::fs::write(&rendered, b"compiled").await.unwrap();

        let delivery = LocalDelivery::new(dir.path().join("out"));
        let dst = tokio_test::assert_ok!(delivery.deliver(&job(9), &rendered).await);

        assert_eq!(dst, dir.path().join("out/compilation_9.mp4"));
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"compiled");
        assert!(rendered.exists());
    }

    #[tokio::test]
    async fn test_missing_render_is_delivery_error() {
        let dir = TempDir::new().unwrap();
        let delivery = LocalDelivery::new(dir.path());

        let err = delivery
            .deliver(&job(1), &dir.path().join("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Delivery(_)));
        assert!(err.kind().is_none());
    }
}
