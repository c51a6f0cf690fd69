//! At-least-once job queue.
//!
//! This crate provides:
//! - The `JobQueue` contract shared by submitters and workers
//! - A Redis Streams backend with consumer groups and stale-claim recovery
//! - An in-process backend for embedded workers and tests

pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use message::{Delivery, QueueMessage};
pub use queue::JobQueue;
pub use redis_queue::{QueueConfig, RedisQueue};
