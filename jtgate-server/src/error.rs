//! Server error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] jtgate_protocol::ProtocolError),

    #[error("core error: {0}")]
    Core(#[from] jtgate_core::CoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns a stable code for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Protocol(e) => e.code(),
            ServerError::Core(e) => e.error_code(),
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::Metrics(_) => "METRICS_ERROR",
            ServerError::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Returns whether the connection that raised this error can keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ServerError::Protocol(e) if e.is_decode_error())
    }
}
