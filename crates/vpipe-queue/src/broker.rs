//! Broker abstraction the orchestrator and executor are written against.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::StageInvocation;

/// A stage invocation handed to one consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-assigned delivery ID, passed back to `ack`
    pub id: String,
    pub invocation: StageInvocation,
}

/// Durable, at-least-once delivery of stage invocations.
///
/// A delivery stays pending until acked. Pending deliveries whose consumer
/// went away are handed out again by `claim_pending`.
#[async_trait]
pub trait StageBroker: Send + Sync {
    /// Enqueue an invocation. Returns the delivery ID.
    ///
    /// Fails with `QueueError::Duplicate` when the same idempotency key was
    /// enqueued recently.
    async fn enqueue(&self, invocation: &StageInvocation) -> QueueResult<String>;

    /// Read up to `count` new deliveries, waiting at most `block_ms`.
    async fn consume(
        &self,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    async fn ack(&self, delivery_id: &str) -> QueueResult<()>;

    /// Reset the idle time of a delivery `consumer` still holds.
    ///
    /// A consumer busy with a long delivery renews it so `claim_pending`
    /// elsewhere does not hand the same delivery out again.
    async fn renew(&self, consumer: &str, delivery_id: &str) -> QueueResult<()>;

    /// Take over deliveries that have been pending for at least `min_idle_ms`.
    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;
}
