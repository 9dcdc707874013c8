//! Compilation job worker.
//!
//! This crate provides:
//! - Clip catalog lookup and selection
//! - Clip downloads with bounded retry
//! - The job executor driving jobs through their persisted statuses
//! - Delivery of finished compilations
//! - Graceful shutdown

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod download;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod stage;

pub use catalog::{select_clips, ChannelRef, ClipCatalog, JsonClipCatalog};
pub use config::WorkerConfig;
pub use delivery::{Delivery, LocalDelivery};
pub use download::{download_all, ClipDownloader, YtDlpDownloader};
pub use error::{WorkerError, WorkerResult};
pub use executor::{Collaborators, JobExecutor};
pub use logging::JobLogger;
pub use stage::{is_valid_transition, JobStage};
