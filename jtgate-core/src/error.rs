//! Core error types.

use crate::session::SessionState;
use thiserror::Error;

/// Errors from building or configuring a processor chain.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("duplicate stage: {name}")]
    DuplicateStage { name: String },
}

impl CoreError {
    /// Returns an error code suitable for operator responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DuplicateStage { .. } => "DUPLICATE_STAGE",
        }
    }
}

/// A validation rule rejected a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rule '{rule}' failed: {message}")]
    RuleFailed { rule: String, message: String },
}

/// A message is not legal in the terminal's current session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("message {message_id:#06x} from terminal {terminal_id} not allowed in state {state}")]
    IllegalTransition {
        terminal_id: String,
        state: SessionState,
        message_id: u16,
    },
}

/// Errors raised by a stage while processing a message.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("unexpected error: {0}")]
    Unexpected(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Returns an error code suitable for operator responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            StageError::Unexpected(_) => "STAGE_ERROR",
            StageError::Handler(_) => "HANDLER_ERROR",
            StageError::Panicked(_) => "STAGE_PANIC",
        }
    }
}
