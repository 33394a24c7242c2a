//! Protocol error types.

use thiserror::Error;

/// Which end of a frame was missing its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelPosition {
    Start,
    End,
}

impl std::fmt::Display for SentinelPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SentinelPosition::Start => write!(f, "start"),
            SentinelPosition::End => write!(f, "end"),
        }
    }
}

/// Protocol-level errors that can occur while framing, decoding or encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("missing 0x7e sentinel at frame {0}")]
    MissingSentinel(SentinelPosition),

    #[error("frame too short: {len} bytes (min {min})")]
    TooShort { len: usize, min: usize },

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("malformed escape sequence at offset {offset}")]
    MalformedEscape { offset: usize },

    #[error("unescaped sentinel at offset {offset}")]
    UnescapedSentinel { offset: usize },

    #[error("truncated header: need {needed} bytes, have {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("truncated body: declared {declared} bytes, have {available}")]
    TruncatedBody { declared: usize, available: usize },

    #[error("invalid BCD byte {0:#04x}")]
    InvalidBcd(u8),

    #[error("invalid terminal id: {0}")]
    InvalidTerminalId(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("invalid body for message {message_id:#06x}: {reason}")]
    InvalidBody { message_id: u16, reason: String },

    #[error("frame too large: {size} bytes buffered (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns a stable code for this error kind, suitable for metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Empty => "EMPTY",
            ProtocolError::MissingSentinel(_) => "MISSING_SENTINEL",
            ProtocolError::TooShort { .. } => "TOO_SHORT",
            ProtocolError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            ProtocolError::MalformedEscape { .. } => "MALFORMED_ESCAPE",
            ProtocolError::UnescapedSentinel { .. } => "UNESCAPED_SENTINEL",
            ProtocolError::TruncatedHeader { .. } => "TRUNCATED_HEADER",
            ProtocolError::TruncatedBody { .. } => "TRUNCATED_BODY",
            ProtocolError::InvalidBcd(_) => "INVALID_BCD",
            ProtocolError::InvalidTerminalId(_) => "INVALID_TERMINAL_ID",
            ProtocolError::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            ProtocolError::InvalidBody { .. } => "INVALID_BODY",
            ProtocolError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
        }
    }

    /// Returns whether this error was raised while decoding inbound bytes.
    pub fn is_decode_error(&self) -> bool {
        !matches!(
            self,
            ProtocolError::InvalidTerminalId(_) | ProtocolError::BodyTooLarge { .. }
        )
    }
}
