//! Persisted compilation jobs.
//!
//! This crate provides:
//! - The [`JobRepository`] contract used by the job executor
//! - [`SqliteJobStore`], a single-connection SQLite implementation
//! - Query metrics

pub mod error;
pub mod metrics;
pub mod repository;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use repository::JobRepository;
pub use sqlite::SqliteJobStore;
