//! In-process queue for embedded workers and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reclip_models::{JobId, JobType};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::QueueResult;
use crate::message::{Delivery, QueueMessage};
use crate::queue::JobQueue;

struct Pending {
    delivery: Delivery,
    delivered_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<(String, QueueMessage)>,
    pending: HashMap<String, Pending>,
}

/// Queue held in process memory with the same delivery semantics as the
/// Redis backend: unacked deliveries can be reclaimed after an idle period.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    seq: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries handed out but not yet acked.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn take_ready(&self, count: usize) -> Vec<Delivery> {
        let mut state = self.state.lock().await;
        let n = count.min(state.ready.len());
        let taken: Vec<_> = state.ready.drain(..n).collect();

        let now = Instant::now();
        taken
            .into_iter()
            .map(|(message_id, message)| {
                let delivery = Delivery {
                    message_id: message_id.clone(),
                    message,
                    attempt: 1,
                };
                state.pending.insert(
                    message_id,
                    Pending {
                        delivery: delivery.clone(),
                        delivered_at: now,
                    },
                );
                delivery
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job_id: &JobId, job_type: JobType) -> QueueResult<String> {
        let message_id = format!("{}-0", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        self.state
            .lock()
            .await
            .ready
            .push_back((message_id.clone(), QueueMessage::new(job_id.clone(), job_type)));
        self.notify.notify_one();

        debug!(job_id = %job_id, "Enqueued job with message ID {}", message_id);
        Ok(message_id)
    }

    async fn dequeue(&self, _consumer: &str, block: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // notify_one leaves a permit when nobody waits, so an enqueue between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            let batch = self.take_ready(count).await;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.state.lock().await.pending.remove(&delivery.message_id);
        Ok(())
    }

    async fn claim_stale(&self, _consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut stale: Vec<&mut Pending> = state
            .pending
            .values_mut()
            .filter(|p| now.duration_since(p.delivered_at) >= min_idle)
            .collect();
        stale.sort_by(|a, b| a.delivery.message_id.cmp(&b.delivery.message_id));

        Ok(stale
            .into_iter()
            .take(count)
            .map(|p| {
                p.delivered_at = now;
                p.delivery.attempt += 1;
                p.delivery.clone()
            })
            .collect())
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.pending.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_delivery_and_ack() {
        let queue = MemoryQueue::new();
        let first = JobId::new();
        let second = JobId::new();
        queue.enqueue(&first, JobType::Concat).await.unwrap();
        queue.enqueue(&second, JobType::Ugc).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        let batch = queue.dequeue("w", Duration::ZERO, 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].job_id(), &first);
        assert_eq!(batch[1].job_id(), &second);
        assert_eq!(batch[1].message.job_type, JobType::Ugc);
        assert_eq!(queue.pending_count().await, 2);

        for delivery in &batch {
            queue.ack(delivery).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let batch = queue.dequeue("w", Duration::from_millis(20), 1).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue("w", Duration::from_secs(5), 1).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let job_id = JobId::new();
        queue.enqueue(&job_id, JobType::Concat).await.unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].job_id(), &job_id);
    }

    #[tokio::test]
    async fn test_unacked_delivery_is_reclaimed() {
        let queue = MemoryQueue::new();
        let job_id = JobId::new();
        queue.enqueue(&job_id, JobType::Ugc).await.unwrap();

        let first = queue.dequeue("dead-worker", Duration::ZERO, 1).await.unwrap();
        assert_eq!(first[0].attempt, 1);

        assert!(queue
            .claim_stale("w", Duration::from_secs(60), 10)
            .await
            .unwrap()
            .is_empty());

        let reclaimed = queue.claim_stale("w", Duration::ZERO, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].job_id(), &job_id);
        assert_eq!(reclaimed[0].attempt, 2);

        queue.ack(&reclaimed[0]).await.unwrap();
        assert!(queue.claim_stale("w", Duration::ZERO, 10).await.unwrap().is_empty());
    }
}
