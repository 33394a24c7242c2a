//! Session tracking stage.

use crate::context::{attr, ProcessContext};
use crate::error::StageError;
use crate::processor::Processor;
use crate::result::ProcessResult;
use crate::session::SessionRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies each message to its terminal's session.
///
/// Messages without a terminal id are skipped. A message that is illegal
/// in the session's current state fails the stage.
#[derive(Debug, Clone)]
pub struct SessionHandler {
    registry: Arc<SessionRegistry>,
}

impl SessionHandler {
    pub const NAME: &'static str = "session_handler";
    pub const PRIORITY: i32 = 20;

    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Processor for SessionHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, ctx: &mut ProcessContext) -> Result<ProcessResult, StageError> {
        let Some(terminal_id) = ctx.message().terminal_id().map(str::to_owned) else {
            return Ok(ProcessResult::skipped(Self::NAME, "message has no terminal id"));
        };
        let message_id = ctx.message().message_id();
        ctx.set_attribute(attr::TERMINAL_ID, terminal_id.as_str());

        match self.registry.touch(&terminal_id, message_id) {
            Ok(state) => {
                ctx.set_attribute(attr::SESSION_STATE, state.as_str());
                Ok(ProcessResult::success(Self::NAME).with_metadata("state", state.as_str()))
            }
            Err(e) => {
                tracing::warn!("Rejected message {:#06x}: {}", message_id, e);
                Ok(ProcessResult::failed(
                    Self::NAME,
                    format!("session validation failed: {}", e),
                ))
            }
        }
    }
}
