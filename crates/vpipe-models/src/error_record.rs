//! The `error.json` document written on terminal job failure.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::{JobId, StageName};

/// Structured failure record, one per failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorRecord {
    /// Job that failed
    pub job_id: JobId,
    /// Stage that failed
    pub step: StageName,
    /// Human-readable error message
    pub error: String,
    /// When the failure was recorded (UTC)
    pub timestamp: DateTime<Utc>,
    /// Attempts made before giving up
    pub attempts: u32,
    /// Whether the failure kind was eligible for retry
    pub retryable: bool,
    /// Stage-specific diagnostics (command line, exit code, artifact paths)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl ErrorRecord {
    pub fn new(job_id: JobId, step: StageName, error: impl Into<String>) -> Self {
        Self {
            job_id,
            step,
            error: error.into(),
            timestamp: Utc::now(),
            attempts: 1,
            retryable: false,
            details: BTreeMap::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_details(mut self, details: BTreeMap<String, String>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_record_json_shape() {
        let record = ErrorRecord::new(JobId::from_string("deadbeef"), StageName::Watermark, "boom")
            .with_attempts(3)
            .with_retryable(true)
            .with_detail("exit_code", "1");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["job_id"], "deadbeef");
        assert_eq!(value["step"], "watermark");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["attempts"], 3);
        assert_eq!(value["details"]["exit_code"], "1");
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_empty_details_omitted() {
        let record = ErrorRecord::new(JobId::new(), StageName::Merge, "bad input");
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("details").is_none());

        let parsed: ErrorRecord = serde_json::from_value(value).unwrap();
        assert!(parsed.details.is_empty());
    }

    #[test]
    fn test_schema_names_step_field() {
        let schema = schemars::schema_for!(ErrorRecord);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("\"step\""));
    }
}
