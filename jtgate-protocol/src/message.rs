//! Decoded messages and well-known message ids.

use crate::body::MessageBody;
use crate::header::Header;
use std::sync::Arc;

/// Message ids the gateway knows by name.
pub mod msg_id {
    // Terminal -> platform
    pub const TERMINAL_GENERAL_RESPONSE: u16 = 0x0001;
    pub const HEARTBEAT: u16 = 0x0002;
    pub const TERMINAL_LOGOUT: u16 = 0x0003;
    pub const REGISTRATION: u16 = 0x0100;
    pub const AUTHENTICATION: u16 = 0x0102;
    pub const LOCATION_REPORT: u16 = 0x0200;
    pub const BATCH_LOCATION: u16 = 0x0704;

    // Platform -> terminal
    pub const PLATFORM_GENERAL_RESPONSE: u16 = 0x8001;
    pub const REGISTRATION_RESPONSE: u16 = 0x8100;

    /// Returns a short name for logs and metric labels.
    pub fn name(id: u16) -> &'static str {
        match id {
            TERMINAL_GENERAL_RESPONSE => "TERMINAL_GENERAL_RESPONSE",
            HEARTBEAT => "HEARTBEAT",
            TERMINAL_LOGOUT => "TERMINAL_LOGOUT",
            REGISTRATION => "REGISTRATION",
            AUTHENTICATION => "AUTHENTICATION",
            LOCATION_REPORT => "LOCATION_REPORT",
            BATCH_LOCATION => "BATCH_LOCATION",
            PLATFORM_GENERAL_RESPONSE => "PLATFORM_GENERAL_RESPONSE",
            REGISTRATION_RESPONSE => "REGISTRATION_RESPONSE",
            _ => "OTHER",
        }
    }
}

/// A header paired with its resolved body.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub body: Arc<dyn MessageBody>,
}

impl Message {
    pub fn new(header: Header, body: impl MessageBody + 'static) -> Self {
        Self {
            header,
            body: Arc::new(body),
        }
    }

    pub fn from_parts(header: Header, body: Arc<dyn MessageBody>) -> Self {
        Self { header, body }
    }

    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    /// Terminal id, or `None` when the header carried an all-zero id.
    pub fn terminal_id(&self) -> Option<&str> {
        if self.header.terminal_id.is_empty() {
            None
        } else {
            Some(&self.header.terminal_id)
        }
    }

    pub fn serial_number(&self) -> u16 {
        self.header.serial_number
    }

    /// Downcasts the body to a concrete type.
    pub fn body_as<T: 'static>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref::<T>()
    }
}
