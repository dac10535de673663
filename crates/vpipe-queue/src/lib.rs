//! Stage invocation broker.
//!
//! This crate provides:
//! - The `StageInvocation` payload and its idempotency key
//! - The `StageBroker` trait the pipeline is written against
//! - A Redis Streams implementation with late ack and pending-entry claims
//! - An in-memory implementation for tests and single-process use

pub mod broker;
pub mod error;
pub mod job;
pub mod memory;
pub mod queue;

pub use broker::{Delivery, StageBroker};
pub use error::{QueueError, QueueResult};
pub use job::StageInvocation;
pub use memory::MemoryBroker;
pub use queue::{QueueConfig, RedisBroker, DEDUP_TTL_SECS};
