//! Queue contract.

use std::time::Duration;

use async_trait::async_trait;
use reclip_models::{JobId, JobType};

use crate::error::QueueResult;
use crate::message::Delivery;

/// Durable hand-off of job ids from submitters to workers.
///
/// Delivery is at-least-once: a message is redelivered if its consumer dies
/// before acking. Workers rely on the job store's atomic claim to turn that
/// into at-most-once execution. Ordering is FIFO best-effort.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job id. Returns the backend message id.
    async fn enqueue(&self, job_id: &JobId, job_type: JobType) -> QueueResult<String>;

    /// Wait up to `block` for at most `count` new messages for `consumer`.
    async fn dequeue(&self, consumer: &str, block: Duration, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Mark a delivery as handled so it is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Take over deliveries left unacked for at least `min_idle`.
    async fn claim_stale(&self, consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Messages published but not yet acked.
    async fn len(&self) -> QueueResult<u64>;

    /// Backend health check.
    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
