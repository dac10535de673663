//! Stage broker backed by a Redis Streams consumer group.

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::broker::{Delivery, StageBroker};
use crate::error::{QueueError, QueueResult};
use crate::job::StageInvocation;

/// How long an idempotency key blocks a second enqueue.
pub const DEDUP_TTL_SECS: u64 = 3600;

const DEDUP_PREFIX: &str = "vpipe:dedup:";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for stage invocations
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// TTL of the dedup key set on enqueue
    pub dedup_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vpipe:stages".to_string(),
            consumer_group: "vpipe:workers".to_string(),
            dedup_ttl_secs: DEDUP_TTL_SECS,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dedup_ttl_secs: defaults.dedup_ttl_secs,
        }
    }
}

/// Redis Streams broker.
pub struct RedisBroker {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisBroker {
    /// Create a new broker. Does not connect until first use.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the stream (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Get stream length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Decode stream entries, acking and dropping the ones that do not parse.
    async fn decode_entries(&self, entries: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let message_id = entry.id.clone();
            let parsed = match entry.map.get("invocation") {
                Some(redis::Value::BulkString(payload)) => {
                    serde_json::from_slice::<StageInvocation>(payload).map_err(|e| e.to_string())
                }
                _ => Err("missing invocation field".to_string()),
            };

            match parsed {
                Ok(invocation) => {
                    debug!(
                        job_id = %invocation.job_id,
                        stage = %invocation.stage,
                        "Received delivery {}",
                        message_id
                    );
                    deliveries.push(Delivery {
                        id: message_id,
                        invocation,
                    });
                }
                Err(e) => {
                    warn!("Dropping malformed delivery {}: {}", message_id, e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack(&message_id).await.ok();
                }
            }
        }

        deliveries
    }
}

#[async_trait]
impl StageBroker for RedisBroker {
    async fn enqueue(&self, invocation: &StageInvocation) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(invocation)?;
        let idempotency_key = invocation.idempotency_key();
        let dedup_key = format!("{}{}", DEDUP_PREFIX, idempotency_key);

        // SET NX claims the key atomically; nil means another enqueue got there first.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl_secs)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!("Duplicate invocation rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("invocation")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;

        let message_id = match added {
            Ok(id) => id,
            Err(e) => {
                // Release the key so a retried enqueue is not rejected.
                conn.del::<_, ()>(&dedup_key).await.ok();
                return Err(QueueError::enqueue_failed(e.to_string()));
            }
        };

        info!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            "Enqueued stage with message ID {}",
            message_id
        );

        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let result: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamId> = result
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();

        Ok(self.decode_entries(entries).await)
    }

    async fn ack(&self, delivery_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(delivery_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(delivery_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged delivery: {}", delivery_id);
        Ok(())
    }

    async fn renew(&self, consumer: &str, delivery_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(delivery_id)
            .arg(delivery_id)
            .arg(1)
            .query_async(&mut conn)
            .await?;
        if !pending.ids.iter().any(|entry| entry.consumer == consumer) {
            return Err(QueueError::DeliveryNotFound(delivery_id.to_string()));
        }

        // XCLAIM to the current holder resets the idle time without
        // redelivering the message.
        let ids: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0)
            .arg(delivery_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if ids.is_empty() {
            return Err(QueueError::DeliveryNotFound(delivery_id.to_string()));
        }
        debug!("Renewed delivery {} for {}", delivery_id, consumer);
        Ok(())
    }

    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

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

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            claim.arg(&entry.id);
        }
        let result: StreamClaimReply = claim.query_async(&mut conn).await?;

        if !result.ids.is_empty() {
            info!(
                "Claimed {} pending deliveries for {}",
                result.ids.len(),
                consumer
            );
        }

        Ok(self.decode_entries(result.ids).await)
    }
}
