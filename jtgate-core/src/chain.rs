//! Priority-ordered processor chain.

use crate::context::ProcessContext;
use crate::error::{CoreError, StageError};
use crate::processor::Processor;
use crate::result::{ProcessResult, ProcessStatus};
use crate::stats::{GlobalSnapshot, GlobalStats, ProcessorStats, StatsSnapshot};
use futures::FutureExt;
use jtgate_protocol::Message;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the chain does after a stage fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Keep running later stages after a stage returns FAILED.
    pub continue_on_failure: bool,
    /// Keep running later stages after a stage errors or panics.
    pub continue_on_error: bool,
    /// How many times a stage returning RETRY is re-run before it is
    /// recorded as FAILED.
    pub max_retries: u32,
    /// Delay between retries.
    pub retry_backoff: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            continue_on_failure: false,
            continue_on_error: false,
            max_retries: 2,
            retry_backoff: Duration::ZERO,
        }
    }
}

/// Everything a chain run produced for one message.
#[derive(Debug)]
pub struct ChainOutcome {
    pub context_id: u64,
    pub message_id: u16,
    pub terminal_id: Option<String>,
    /// Results in execution order, one per stage that was reached.
    pub results: Vec<ProcessResult>,
    pub response: Option<Message>,
    pub attributes: HashMap<String, Value>,
    /// False when a stage halted the chain.
    pub completed: bool,
    pub duration: Duration,
}

impl ChainOutcome {
    /// True when no stage reported FAILED.
    pub fn succeeded(&self) -> bool {
        !self.results.iter().any(ProcessResult::is_failed)
    }

    /// The first FAILED result, if any.
    pub fn first_failure(&self) -> Option<&ProcessResult> {
        self.results.iter().find(|r| r.is_failed())
    }

    pub fn result(&self, stage: &str) -> Option<&ProcessResult> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

struct Stage {
    processor: Arc<dyn Processor>,
    stats: Arc<ProcessorStats>,
}

/// Runs registered stages sequentially in ascending priority order.
///
/// Stages with equal priority keep their registration order. The chain is
/// built once and then shared; `process` takes `&self` and may run for many
/// messages concurrently.
pub struct ProcessorChain {
    stages: Vec<Stage>,
    policy: FailurePolicy,
    next_context_id: AtomicU64,
    global: GlobalStats,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::with_policy(FailurePolicy::default())
    }

    pub fn with_policy(policy: FailurePolicy) -> Self {
        Self {
            stages: Vec::new(),
            policy,
            next_context_id: AtomicU64::new(0),
            global: GlobalStats::new(),
        }
    }

    /// Registers a stage. Stage names must be unique.
    pub fn add(&mut self, processor: Arc<dyn Processor>) -> Result<(), CoreError> {
        let name = processor.name().to_string();
        if self.stages.iter().any(|s| s.processor.name() == name) {
            return Err(CoreError::DuplicateStage { name });
        }

        let priority = processor.priority();
        let position = self
            .stages
            .iter()
            .position(|s| s.processor.priority() > priority)
            .unwrap_or(self.stages.len());

        tracing::debug!("Registered stage '{}' with priority {}", name, priority);
        self.stages.insert(
            position,
            Stage {
                processor,
                stats: Arc::new(ProcessorStats::new(name)),
            },
        );
        Ok(())
    }

    /// Builder form of [`Self::add`].
    pub fn with_stage(mut self, processor: Arc<dyn Processor>) -> Result<Self, CoreError> {
        self.add(processor)?;
        Ok(self)
    }

    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.processor.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage against a fresh context for `message`.
    pub async fn process(&self, message: Message) -> ChainOutcome {
        let context_id = self.next_context_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = message.message_id();
        let terminal_id = message.terminal_id().map(str::to_owned);
        let mut ctx = ProcessContext::new(context_id, message);
        let mut results = Vec::with_capacity(self.stages.len());
        let mut completed = true;

        for stage in &self.stages {
            let name = stage.processor.name();

            if !stage.processor.can_process(ctx.message()) {
                let result = ProcessResult::skipped(name, "stage does not accept this message");
                self.record(stage, &result);
                ctx.set_last_result(result.clone());
                results.push(result);
                continue;
            }

            let (result, errored) = self.run_stage(stage, &mut ctx).await;
            self.record(stage, &result);
            tracing::debug!(
                "Context {} stage '{}' -> {} in {:.3}ms",
                context_id,
                name,
                result.status,
                result.duration_ms()
            );

            let halt = if !ctx.should_continue() {
                tracing::debug!("Context {} halted by stage '{}'", context_id, name);
                true
            } else if result.is_failed() {
                let keep_going = if errored {
                    self.policy.continue_on_error
                } else {
                    self.policy.continue_on_failure
                };
                if !keep_going {
                    tracing::warn!(
                        "Stage '{}' failed for message {:#06x}: {}",
                        name,
                        message_id,
                        result.error.as_deref().unwrap_or("no detail")
                    );
                }
                !keep_going
            } else {
                false
            };

            ctx.set_last_result(result.clone());
            results.push(result);
            if halt {
                completed = false;
                break;
            }
        }

        self.global.record_chain(completed);

        ChainOutcome {
            context_id,
            message_id,
            terminal_id,
            results,
            response: ctx.take_response(),
            duration: ctx.processing_time(),
            attributes: ctx.take_attributes(),
            completed,
        }
    }

    /// Runs one stage, converting errors and panics into FAILED results and
    /// re-running on RETRY. The flag is true when the failure was an error
    /// rather than a FAILED result.
    async fn run_stage(&self, stage: &Stage, ctx: &mut ProcessContext) -> (ProcessResult, bool) {
        let name = stage.processor.name();
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(stage.processor.process(ctx))
                .catch_unwind()
                .await;
            let elapsed = started.elapsed();

            let (result, errored) = match outcome {
                Ok(Ok(result)) => (result.with_duration(elapsed), false),
                Ok(Err(e)) => (ProcessResult::failed(name, &e).with_duration(elapsed), true),
                Err(panic) => {
                    let e = StageError::Panicked(panic_message(panic.as_ref()));
                    tracing::error!("Stage '{}' panicked: {}", name, e);
                    (ProcessResult::failed(name, &e).with_duration(elapsed), true)
                }
            };

            if result.status != ProcessStatus::Retry {
                return (result, errored);
            }

            if attempt >= self.policy.max_retries {
                let reason = result.message.clone().unwrap_or_default();
                let mut failed = ProcessResult::failed(
                    name,
                    format!("retries exhausted after {} attempts: {}", attempt + 1, reason),
                )
                .with_duration(elapsed);
                failed.metadata = result.metadata;
                return (failed, false);
            }

            self.record(stage, &result);
            attempt += 1;
            tracing::debug!("Retrying stage '{}' (attempt {})", name, attempt + 1);
            if !self.policy.retry_backoff.is_zero() {
                tokio::time::sleep(self.policy.retry_backoff).await;
            }
        }
    }

    fn record(&self, stage: &Stage, result: &ProcessResult) {
        stage.stats.record(result.status, result.duration);
        self.global.record(result.status, result.duration);
    }

    /// Statistics for a stage by name.
    pub fn stage_stats(&self, name: &str) -> Option<Arc<ProcessorStats>> {
        self.stages
            .iter()
            .find(|s| s.processor.name() == name)
            .map(|s| s.stats.clone())
    }

    /// Snapshots of every stage's statistics in execution order.
    pub fn stage_snapshots(&self) -> Vec<(String, StatsSnapshot)> {
        self.stages
            .iter()
            .map(|s| (s.stats.name().to_string(), s.stats.snapshot()))
            .collect()
    }

    pub fn global_stats(&self) -> &GlobalStats {
        &self.global
    }

    pub fn global_snapshot(&self) -> GlobalSnapshot {
        self.global.snapshot()
    }
}

impl Default for ProcessorChain {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
