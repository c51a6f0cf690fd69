//! Shared data models for the reclip job service.
//!
//! This crate provides Serde-serializable types for:
//! - Job records and their status machine
//! - Concat and UGC job parameters
//! - Uploads and their identifiers
//! - Archive packaging variants
//! - Encoding defaults

pub mod archive;
pub mod encoding;
pub mod job;
pub mod params;
pub mod upload;

// Re-export common types
pub use archive::ArchiveVariant;
pub use encoding::EncodingConfig;
pub use job::{Job, JobId, JobStatus, JobType, Progress, Summary, TransitionError};
pub use params::{ConcatOrder, ConcatParams, JobParams, OverlayAlign, OverlayConfig, UgcParams};
pub use upload::{is_valid_id, sanitize_filename, Upload, UploadId};
