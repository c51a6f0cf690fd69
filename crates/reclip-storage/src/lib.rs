//! Local storage for the reclip job service.
//!
//! This crate provides:
//! - Upload storage with id-to-path resolution and job staging
//! - Job record stores (in-memory and filesystem) with an atomic claim
//! - The per-job directory layout
//! - Lazy, idempotent archive packaging

pub mod archive;
pub mod config;
pub mod error;
pub mod fs;
pub mod fs_utils;
pub mod layout;
pub mod memory;
pub mod store;
pub mod uploads;

pub use archive::Packager;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use fs::FsJobStore;
pub use layout::JobLayout;
pub use memory::MemoryJobStore;
pub use store::{ClaimOutcome, JobStore};
pub use uploads::UploadStore;
