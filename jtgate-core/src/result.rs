//! Uniform stage outcome.

use jtgate_protocol::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Outcome status of a single stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Success,
    Failed,
    Skipped,
    Retry,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Success => "SUCCESS",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Skipped => "SKIPPED",
            ProcessStatus::Retry => "RETRY",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage reported for one message.
///
/// Built with the constructors and `with_*` builders, then treated as
/// immutable. The chain fills in `duration` after the stage returns.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub stage: String,
    pub status: ProcessStatus,
    pub duration: Duration,
    pub message: Option<String>,
    pub error: Option<String>,
    pub response: Option<Message>,
    pub metadata: HashMap<String, Value>,
}

impl ProcessResult {
    fn new(stage: impl Into<String>, status: ProcessStatus) -> Self {
        Self {
            stage: stage.into(),
            status,
            duration: Duration::ZERO,
            message: None,
            error: None,
            response: None,
            metadata: HashMap::new(),
        }
    }

    pub fn success(stage: impl Into<String>) -> Self {
        Self::new(stage, ProcessStatus::Success)
    }

    pub fn failed(stage: impl Into<String>, error: impl fmt::Display) -> Self {
        let mut result = Self::new(stage, ProcessStatus::Failed);
        result.error = Some(error.to_string());
        result
    }

    pub fn skipped(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(stage, ProcessStatus::Skipped).with_message(reason)
    }

    pub fn retry(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(stage, ProcessStatus::Retry).with_message(reason)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_response(mut self, response: Message) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == ProcessStatus::Failed
    }

    /// Duration in fractional milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}
