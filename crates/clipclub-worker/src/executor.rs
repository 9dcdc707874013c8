//! Job executor.
//!
//! Polls the job store for the oldest pending compilation and drives it
//! through download, render and delivery, persisting every status change.
//! One job runs at a time; shutdown is honoured between jobs.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use clipclub_media::{
    build_manifest, CompositionOrchestrator, FfmpegRunner, FfprobeProber, Prober,
};
use clipclub_models::{CompilationJob, JobStatus, ManifestEntry};
use clipclub_store::{JobRepository, SqliteJobStore};

use crate::catalog::{date_window, select_clips, ClipCatalog, JsonClipCatalog};
use crate::config::WorkerConfig;
use crate::delivery::{Delivery, LocalDelivery};
use crate::download::{download_all, ClipDownloader, YtDlpDownloader};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::retry::{FailureTracker, RetryConfig};
use crate::stage::{is_valid_transition, JobStage};

/// Everything the executor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobRepository>,
    pub catalog: Arc<dyn ClipCatalog>,
    pub downloader: Arc<dyn ClipDownloader>,
    pub prober: Arc<dyn Prober>,
    pub compositor: Arc<CompositionOrchestrator>,
    pub delivery: Arc<dyn Delivery>,
}

/// Job executor that processes compilation jobs from the store.
pub struct JobExecutor {
    config: WorkerConfig,
    deps: Collaborators,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, deps: Collaborators) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            deps,
            shutdown,
        }
    }

    /// Wire the production collaborators from configuration.
    pub fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        let jobs = SqliteJobStore::open(&config.db_path)?;

        let retry = RetryConfig::new("clip_download")
            .with_max_attempts(config.download_max_attempts)
            .with_base_delay(config.download_retry_delay);
        let downloader = YtDlpDownloader::new(&config.state_dir, retry)?;

        let encoder = FfmpegRunner::new()?;
        let compositor = CompositionOrchestrator::new(Arc::new(encoder), config.composition());

        let deps = Collaborators {
            jobs: Arc::new(jobs),
            catalog: Arc::new(JsonClipCatalog::new(&config.catalog_dir)),
            downloader: Arc::new(downloader),
            prober: Arc::new(FfprobeProber::new()?),
            compositor: Arc::new(compositor),
            delivery: Arc::new(LocalDelivery::new(&config.delivery_dir)),
        };

        Ok(Self::new(config, deps))
    }

    /// Poll for jobs until [`JobExecutor::shutdown`] is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            db = %self.config.db_path.display(),
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Starting job executor"
        );

        if self.config.requeue_interrupted {
            let requeued = self.deps.jobs.reset_interrupted().await?;
            if requeued > 0 {
                info!("Requeued {} interrupted jobs", requeued);
            }
        }

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut poll_failures = FailureTracker::new(5);

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            match self.run_once().await {
                Ok(true) => {
                    poll_failures.record_success();
                    continue;
                }
                Ok(false) => poll_failures.record_success(),
                Err(e) => {
                    if poll_failures.record_failure() {
                        error!("Failed to poll for jobs: {}", e);
                    }
                }
            }

            // Idle: only the wait is interruptible, never a running job
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Process the oldest pending job, if there is one.
    ///
    /// Returns whether a job was picked up.
    pub async fn run_once(&self) -> WorkerResult<bool> {
        match self.deps.jobs.next_pending().await? {
            Some(job) => {
                self.process_job(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask [`JobExecutor::run`] to stop after the current job.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Drive one job to its final status and return that status.
    ///
    /// Job failures are persisted as failure codes and never returned as
    /// errors. Faults without a code leave the job where it stopped.
    pub async fn process_job(&self, job: CompilationJob) -> JobStatus {
        let logger = JobLogger::new(job.id, "compilation");
        let span = logger.create_span();

        async move {
            logger.log_start(&format!(
                "channel={} count={} method={} range={}d",
                job.channel, job.count, job.method, job.range
            ));

            let mut status = job.status;
            let result = self.drive(&job, &logger, &mut status).await;

            match result {
                Ok(()) => logger.log_completion(&format!("status={}", status)),
                Err(e) => {
                    logger.log_error(&e.to_string(), e.diagnostic());
                    match e.kind() {
                        Some(code) => {
                            if let Err(e) = self
                                .transition(&job, &logger, &mut status, JobStatus::Failed(code))
                                .await
                            {
                                logger.log_error(&format!("could not record failure: {}", e), None);
                            }
                        }
                        None => logger.log_warning(&format!("job left in status {}", status)),
                    }
                }
            }

            record_job(status.as_str());
            status
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        job: &CompilationJob,
        logger: &JobLogger,
        status: &mut JobStatus,
    ) -> WorkerResult<()> {
        let mut manifest: Vec<ManifestEntry> = Vec::new();
        let mut rendered = PathBuf::new();

        let mut stage = Some(JobStage::Download);
        while let Some(current) = stage {
            self.transition(job, logger, status, current.status()).await?;

            match current {
                JobStage::Download => manifest = self.prepare_manifest(job, logger).await?,
                JobStage::Render => {
                    rendered = self
                        .deps
                        .compositor
                        .combine(&manifest, &self.config.output_path(job.id))
                        .await?;
                    logger.log_progress(&format!("rendered {}", rendered.display()));
                }
                JobStage::Upload => {
                    let delivered = self.deps.delivery.deliver(job, &rendered).await?;
                    logger.log_progress(&format!("delivered {}", delivered.display()));
                }
            }

            stage = current.next();
        }

        self.transition(job, logger, status, JobStatus::Complete).await
    }

    /// Reuse the stored manifest, or fetch, download and probe the clips.
    async fn prepare_manifest(
        &self,
        job: &CompilationJob,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<ManifestEntry>> {
        if let Some(existing) = &job.manifest {
            for entry in existing {
                if !tokio::fs::try_exists(&entry.file).await.unwrap_or(false) {
                    return Err(WorkerError::DownloadFailed {
                        clip_id: entry.file.display().to_string(),
                        attempts: 0,
                        message: "file from stored manifest is missing".to_string(),
                    });
                }
            }
            logger.log_progress(&format!("reusing stored manifest of {} clips", existing.len()));
            return Ok(existing.clone());
        }

        let manifest = self.fetch_manifest(job, logger).await.map_err(download_fault)?;
        self.deps.jobs.set_manifest(job.id, &manifest).await?;
        Ok(manifest)
    }

    async fn fetch_manifest(
        &self,
        job: &CompilationJob,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<ManifestEntry>> {
        let count = job.count as usize;
        let channel = self.deps.catalog.resolve_channel(&job.channel).await?;
        let (start, end) = date_window(Utc::now(), job.range);
        let clips = self
            .deps
            .catalog
            .get_clips(&channel, start, end, count)
            .await?;
        let selected = select_clips(clips, count, job.method, &mut rand::rng());
        logger.log_progress(&format!("selected {} clips", selected.len()));

        let downloaded = download_all(self.deps.downloader.as_ref(), &selected).await?;
        build_manifest(self.deps.prober.as_ref(), &downloaded)
            .await
            .map_err(WorkerError::Probe)
    }

    async fn transition(
        &self,
        job: &CompilationJob,
        logger: &JobLogger,
        status: &mut JobStatus,
        to: JobStatus,
    ) -> WorkerResult<()> {
        if !is_valid_transition(*status, to) {
            warn!(job_id = %job.id, from = %status, to = %to, "Refusing status change");
            return Err(WorkerError::InvalidTransition { from: *status, to });
        }
        self.deps.jobs.set_status(job.id, to).await?;
        logger.log_transition(status, &to);
        *status = to;
        Ok(())
    }
}

/// Local faults while fetching clips (scratch directory, temp files) still
/// end the job as a download failure instead of stranding it mid-download.
fn download_fault(err: WorkerError) -> WorkerError {
    match err {
        e @ (WorkerError::Io(_) | WorkerError::Media(_)) => WorkerError::DownloadFailed {
            clip_id: "-".to_string(),
            attempts: 0,
            message: e.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipclub_media::MediaError;
    use clipclub_models::FailureCode;

    #[test]
    fn test_local_download_faults_fail_the_job() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only state dir");
        assert_eq!(download_fault(WorkerError::Io(io)).kind(), Some(FailureCode::DownloadFailed));

        let media = MediaError::ffmpeg_failed("rename failed", None, None);
        assert_eq!(download_fault(WorkerError::Media(media)).kind(), Some(FailureCode::DownloadFailed));

        let missing = download_fault(WorkerError::ChannelNotFound("nobody".into()));
        assert_eq!(missing.kind(), Some(FailureCode::ChannelNotFound));
    }
}
