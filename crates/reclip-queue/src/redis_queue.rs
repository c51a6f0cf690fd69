//! Redis Streams backend.
//!
//! Jobs are `XADD`ed to one stream and read through a consumer group, so
//! each entry is handed to a single consumer and stays in its pending list
//! until `XACK`. Entries idle in a pending list past a threshold belong to a
//! dead worker and are taken over with `XCLAIM`.

use std::time::Duration;

use async_trait::async_trait;
use reclip_models::{JobId, JobType};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, QueueMessage};
use crate::queue::JobQueue;

const PAYLOAD_FIELD: &str = "job";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Approximate cap on stream length (`MAXLEN ~`)
    pub max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "reclip:jobs".to_string(),
            consumer_group: "reclip:workers".to_string(),
            max_len: 100_000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("RECLIP_QUEUE").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("RECLIP_QUEUE_GROUP").unwrap_or(defaults.consumer_group),
            max_len: std::env::var("RECLIP_QUEUE_MAX_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_len),
        }
    }
}

/// Job queue on a Redis stream.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create the consumer group (and stream) if missing.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    /// Decode stream entries. Malformed entries are acked and dropped so they
    /// are not redelivered forever.
    async fn decode_entries(&self, entries: Vec<StreamId>, attempts: &[(String, u32)]) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());
        for entry in entries {
            let attempt = attempts
                .iter()
                .find(|(id, _)| *id == entry.id)
                .map(|(_, n)| *n)
                .unwrap_or(1);

            match parse_entry(&entry) {
                Ok(message) => deliveries.push(Delivery {
                    message_id: entry.id,
                    message,
                    attempt,
                }),
                Err(e) => {
                    warn!("Dropping queue entry: {}", e);
                    if let Err(ack_err) = self.ack_id(&entry.id).await {
                        warn!(message_id = %entry.id, "Failed to ack malformed entry: {}", ack_err);
                    }
                }
            }
        }
        deliveries
    }

    async fn ack_id(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }
}

fn parse_entry(entry: &StreamId) -> QueueResult<QueueMessage> {
    let payload: String = entry.get(PAYLOAD_FIELD).ok_or_else(|| QueueError::Malformed {
        id: entry.id.clone(),
        reason: format!("missing '{}' field", PAYLOAD_FIELD),
    })?;
    serde_json::from_str(&payload).map_err(|e| QueueError::Malformed {
        id: entry.id.clone(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job_id: &JobId, job_type: JobType) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&QueueMessage::new(job_id.clone(), job_type))?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(job_id = %job_id, "Enqueued job with message ID {}", message_id);
        Ok(message_id)
    }

    async fn dequeue(&self, consumer: &str, block: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        Ok(self.decode_entries(entries, &[]).await)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.ack_id(&delivery.message_id).await
    }

    async fn claim_stale(&self, consumer: &str, min_idle: Duration, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM bumps the delivery counter, so the next attempt is one more.
        let attempts: Vec<(String, u32)> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u32 + 1))
            .collect();

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for (id, _) in &attempts {
            cmd.arg(id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries = self.decode_entries(claimed.ids, &attempts).await;
        for delivery in &deliveries {
            info!(
                job_id = %delivery.job_id(),
                attempt = delivery.attempt,
                "Claimed stale delivery {}",
                delivery.message_id
            );
        }
        Ok(deliveries)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
