//! Worker error types.

use thiserror::Error;

use clipclub_media::{CompositionError, GraphError, MediaError, RenderStage};
use clipclub_models::{FailureCode, JobStatus};
use clipclub_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Channel {channel} has {found} clips in range, {required} required")]
    NotEnoughClips {
        channel: String,
        found: usize,
        required: usize,
    },

    #[error("Download of clip {clip_id} failed after {attempts} attempts: {message}")]
    DownloadFailed {
        clip_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Probe failed: {0}")]
    Probe(#[source] MediaError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error("Delivery failed: {0}")]
    Delivery(#[source] MediaError),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Terminal status code this error is persisted as.
    ///
    /// `None` for infrastructure faults (store, delivery, configuration);
    /// those leave the job in its current status.
    pub fn kind(&self) -> Option<FailureCode> {
        match self {
            WorkerError::ChannelNotFound(_) => Some(FailureCode::ChannelNotFound),
            WorkerError::NotEnoughClips { .. } => Some(FailureCode::NotEnoughClips),
            WorkerError::DownloadFailed { .. } | WorkerError::Probe(_) | WorkerError::Catalog(_) => {
                Some(FailureCode::DownloadFailed)
            }
            WorkerError::Composition(e) => Some(composition_failure_code(e)),
            WorkerError::Delivery(_)
            | WorkerError::InvalidTransition { .. }
            | WorkerError::Store(_)
            | WorkerError::Media(_)
            | WorkerError::ConfigError(_)
            | WorkerError::Io(_) => None,
        }
    }

    /// Encoder diagnostic output, verbatim, when the error came from a render.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            WorkerError::Composition(e) => e.diagnostic(),
            WorkerError::Probe(e) | WorkerError::Media(e) => e.diagnostic(),
            _ => None,
        }
    }
}

fn composition_failure_code(err: &CompositionError) -> FailureCode {
    match err {
        CompositionError::Graph(GraphError::InsufficientClips { .. }) => FailureCode::NotEnoughClips,
        CompositionError::Graph(GraphError::InvalidDuration { .. }) => FailureCode::RenderTitlesFailed,
        CompositionError::Stage { stage, .. } => stage.failure_code(),
        // Scratch space is needed before the first encode
        CompositionError::Workspace(_) => RenderStage::Reconcile.failure_code(),
    }
}
