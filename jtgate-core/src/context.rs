//! Per-message state threaded through the processor chain.

use crate::result::ProcessResult;
use chrono::{DateTime, Utc};
use jtgate_protocol::Message;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Attribute keys written by the built-in stages.
pub mod attr {
    /// Terminal id resolved by the session handler.
    pub const TERMINAL_ID: &str = "terminal_id";
    /// Session state after the session handler ran.
    pub const SESSION_STATE: &str = "session_state";
    /// Array of rule failures recorded by a lenient validator.
    pub const VALIDATION_WARNINGS: &str = "validation_warnings";
    /// RFC 3339 receive time stamped by the performance monitor.
    pub const RECEIVED_AT: &str = "received_at";
}

/// Request-scoped state for one in-flight message.
///
/// Owned by exactly one chain run. Earlier stages write attributes that
/// later stages read.
#[derive(Debug)]
pub struct ProcessContext {
    id: u64,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    started_at: Option<Instant>,
    message: Message,
    attributes: HashMap<String, Value>,
    should_continue: bool,
    last_result: Option<ProcessResult>,
    response: Option<Message>,
}

impl ProcessContext {
    pub fn new(id: u64, message: Message) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            started_at: None,
            message,
            attributes: HashMap::new(),
            should_continue: true,
            last_result: None,
            response: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    /// Marks the start of timed processing.
    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Time since [`Self::mark_started`], or since creation if never marked.
    pub fn processing_time(&self) -> Duration {
        self.started_at.unwrap_or(self.created_at).elapsed()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub(crate) fn take_attributes(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.attributes)
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    /// Halts the chain after the current stage.
    pub fn stop(&mut self) {
        self.should_continue = false;
    }

    pub fn last_result(&self) -> Option<&ProcessResult> {
        self.last_result.as_ref()
    }

    pub(crate) fn set_last_result(&mut self, result: ProcessResult) {
        self.last_result = Some(result);
    }

    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Message) {
        self.response = Some(response);
    }

    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }
}
