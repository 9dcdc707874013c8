//! Shared data models for the clip compilation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Clip descriptors fetched from the clip catalog
//! - Compilation manifests (ordered, probed clips with captions)
//! - Compilation jobs and their persisted status codes

pub mod clip;
pub mod job;
pub mod job_status;
pub mod manifest;

// Re-export common types
pub use clip::{ClipDescriptor, SelectionMethod};
pub use job::{CompilationJob, JobId, JobRequestError, NewCompilationJob};
pub use job_status::{FailureCode, JobStatus, UnknownStatus};
pub use manifest::{caption_text, ManifestEntry};
