//! Job worker for the reclip job service.
//!
//! This crate provides:
//! - The job executor: claim, stage, render, record, ack
//! - A buffered, non-blocking progress/log reporter
//! - Upload staging into per-job input directories
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod reporter;
pub mod staging;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome, WorkerContext, SUMMARY_ERROR_CODE};
pub use logging::JobLogger;
pub use reporter::JobReporter;
pub use staging::Stager;
