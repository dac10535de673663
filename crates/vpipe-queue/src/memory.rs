//! In-process broker with the same at-least-once semantics as the Redis one.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::broker::{Delivery, StageBroker};
use crate::error::{QueueError, QueueResult};
use crate::job::StageInvocation;
use crate::queue::DEDUP_TTL_SECS;

struct PendingEntry {
    consumer: String,
    invocation: StageInvocation,
    delivered_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    ready: VecDeque<(String, StageInvocation)>,
    pending: BTreeMap<String, PendingEntry>,
    dedup: HashMap<String, Instant>,
}

/// Broker that keeps everything in memory. Nothing survives the process.
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
    notify: Notify,
    dedup_ttl: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notify: Notify::new(),
            dedup_ttl: Duration::from_secs(DEDUP_TTL_SECS),
        }
    }

    /// Override how long an idempotency key blocks re-enqueue.
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    /// Invocations waiting for a consumer.
    pub fn ready_len(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    /// Deliveries handed out but not yet acked.
    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::connection_failed("memory broker state poisoned"))
    }

    fn take_ready(&self, consumer: &str, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock()?;
        let mut deliveries = Vec::new();
        while deliveries.len() < count {
            let Some((id, invocation)) = state.ready.pop_front() else {
                break;
            };
            state.pending.insert(
                id.clone(),
                PendingEntry {
                    consumer: consumer.to_string(),
                    invocation: invocation.clone(),
                    delivered_at: Instant::now(),
                },
            );
            deliveries.push(Delivery { id, invocation });
        }
        Ok(deliveries)
    }
}

#[async_trait]
impl StageBroker for MemoryBroker {
    async fn enqueue(&self, invocation: &StageInvocation) -> QueueResult<String> {
        let key = invocation.idempotency_key();
        let id = {
            let mut state = self.lock()?;
            let now = Instant::now();
            if let Some(expires) = state.dedup.get(&key) {
                if *expires > now {
                    warn!("Duplicate invocation rejected: {}", key);
                    return Err(QueueError::Duplicate(key));
                }
            }
            state.dedup.insert(key, now + self.dedup_ttl);

            state.next_id += 1;
            let id = format!("{}-0", state.next_id);
            state.ready.push_back((id.clone(), invocation.clone()));
            id
        };

        debug!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            "Enqueued stage with message ID {}",
            id
        );
        self.notify.notify_one();
        Ok(id)
    }

    async fn consume(
        &self,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            let deliveries = self.take_ready(consumer, count)?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn ack(&self, delivery_id: &str) -> QueueResult<()> {
        let mut state = self.lock()?;
        match state.pending.remove(delivery_id) {
            Some(_) => {
                debug!("Acknowledged delivery: {}", delivery_id);
                Ok(())
            }
            None => Err(QueueError::DeliveryNotFound(delivery_id.to_string())),
        }
    }

    async fn renew(&self, consumer: &str, delivery_id: &str) -> QueueResult<()> {
        let mut state = self.lock()?;
        match state.pending.get_mut(delivery_id) {
            Some(entry) if entry.consumer == consumer => {
                entry.delivered_at = Instant::now();
                Ok(())
            }
            _ => Err(QueueError::DeliveryNotFound(delivery_id.to_string())),
        }
    }

    async fn claim_pending(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();
        let mut state = self.lock()?;

        let mut claimed = Vec::new();
        for (id, entry) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(entry.delivered_at) < min_idle {
                continue;
            }
            debug!(
                "Claiming delivery {} from {} for {}",
                id, entry.consumer, consumer
            );
            entry.consumer = consumer.to_string();
            entry.delivered_at = now;
            claimed.push(Delivery {
                id: id.clone(),
                invocation: entry.invocation.clone(),
            });
        }
        Ok(claimed)
    }
}
