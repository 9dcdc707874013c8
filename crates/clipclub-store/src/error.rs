//! Job store error types.

use thiserror::Error;

use clipclub_models::JobId;

/// Result type for job store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing jobs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Manifest for job {0} was already written")]
    ManifestAlreadyWritten(JobId),

    #[error("Job {id} has an unreadable row: {message}")]
    CorruptRow { id: i64, message: String },

    #[error("Rejected job request: {0}")]
    InvalidRequest(#[from] clipclub_models::JobRequestError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database connection unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn corrupt(id: i64, message: impl Into<String>) -> Self {
        Self::CorruptRow {
            id,
            message: message.into(),
        }
    }

    /// True if retrying later might succeed (e.g. the database is locked).
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}
