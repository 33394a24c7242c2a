//! Performance monitor stage.

use crate::chain::ChainOutcome;
use crate::context::{attr, ProcessContext};
use crate::error::StageError;
use crate::processor::Processor;
use crate::result::{ProcessResult, ProcessStatus};
use crate::stats::{Counters, StatsSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Times whole chain runs per message id.
///
/// Runs first to stamp the start of processing. The chain owner calls
/// [`PerformanceMonitor::complete`] once the chain finishes, which records
/// the duration and outcome.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    by_message: DashMap<u16, Arc<Counters>>,
    global: Counters,
}

/// Point-in-time view of the monitor's counters.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub global: StatsSnapshot,
    /// Keyed by message id as `0x0200`.
    pub by_message: BTreeMap<String, StatsSnapshot>,
}

impl PerformanceMonitor {
    pub const NAME: &'static str = "performance_monitor";
    pub const PRIORITY: i32 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished chain run.
    pub fn complete(&self, outcome: &ChainOutcome) {
        let status = if outcome.succeeded() {
            ProcessStatus::Success
        } else {
            ProcessStatus::Failed
        };

        let counters = self
            .by_message
            .entry(outcome.message_id)
            .or_insert_with(|| Arc::new(Counters::new()))
            .clone();
        counters.record(status, outcome.duration);
        self.global.record(status, outcome.duration);
    }

    pub fn message_snapshot(&self, message_id: u16) -> Option<StatsSnapshot> {
        self.by_message.get(&message_id).map(|c| c.snapshot())
    }

    pub fn global_snapshot(&self) -> StatsSnapshot {
        self.global.snapshot()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            global: self.global.snapshot(),
            by_message: self
                .by_message
                .iter()
                .map(|entry| (format!("{:#06x}", entry.key()), entry.value().snapshot()))
                .collect(),
        }
    }
}

#[async_trait]
impl Processor for PerformanceMonitor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, ctx: &mut ProcessContext) -> Result<ProcessResult, StageError> {
        ctx.mark_started();
        ctx.set_attribute(attr::RECEIVED_AT, ctx.created_at_utc().to_rfc3339());
        Ok(ProcessResult::success(Self::NAME))
    }
}
