//! Shared data models for the vpipe job pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and the job state machine
//! - Stage names and the fixed stage chain
//! - Job directory layout (the filesystem is the only persistence layer)
//! - The `error.json` failure record
//! - Encoding constants for the external tool invocations

pub mod chain;
pub mod encoding;
pub mod error;
pub mod error_record;
pub mod job;
pub mod layout;

// Re-export common types
pub use chain::{ChainSpec, MAX_INPUTS, MIN_INPUTS};
pub use encoding::EncodingConfig;
pub use error::{ModelError, ModelResult};
pub use error_record::ErrorRecord;
pub use job::{JobEvent, JobId, JobState, StageName};
pub use layout::JobLayout;
