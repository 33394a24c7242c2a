//! The stage interface run by [`ProcessorChain`](crate::ProcessorChain).

use crate::context::ProcessContext;
use crate::error::StageError;
use crate::result::ProcessResult;
use async_trait::async_trait;
use jtgate_protocol::Message;

/// One unit of per-message work.
///
/// Stages run in ascending `priority` order. A stage that cannot handle a
/// message returns `false` from `can_process` and is recorded as skipped.
/// Returning `Err` is treated as an unexpected failure and is subject to
/// the chain's `continue_on_error` policy.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    fn can_process(&self, _message: &Message) -> bool {
        true
    }

    async fn process(&self, ctx: &mut ProcessContext) -> Result<ProcessResult, StageError>;
}
