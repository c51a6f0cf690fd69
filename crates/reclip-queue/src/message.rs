//! Queue payloads.

use chrono::{DateTime, Utc};
use reclip_models::{JobId, JobType};
use serde::{Deserialize, Serialize};

/// What travels through the queue: only the job id plus routing hints.
/// Parameters stay in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub job_type: JobType,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(job_id: JobId, job_type: JobType) -> Self {
        Self {
            job_id,
            job_type,
            enqueued_at: Utc::now(),
        }
    }
}

/// One delivery of a message to a consumer. Must be acked once handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Backend message id used for acknowledgement
    pub message_id: String,
    pub message: QueueMessage,
    /// How many times the backend has handed this message out (1 on first delivery)
    pub attempt: u32,
}

impl Delivery {
    pub fn job_id(&self) -> &JobId {
        &self.message.job_id
    }
}
