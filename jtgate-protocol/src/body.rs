//! Message bodies and the registry that resolves them by message id.
//!
//! The codec never interprets body bytes itself. A [`BodyRegistry`] maps each
//! message id to a factory for a [`MessageBody`]; ids without a factory decode
//! to [`RawBody`].

use crate::error::ProtocolError;
use crate::message::msg_id;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A message body that knows its own wire encoding.
pub trait MessageBody: Send + Sync + fmt::Debug {
    /// Encodes the body fields.
    fn encode_body(&self) -> Result<Bytes, ProtocolError>;

    /// Replaces the body fields with those decoded from `body`.
    fn decode_body(&mut self, body: &[u8]) -> Result<(), ProtocolError>;

    /// Allows callers to downcast to the concrete body type.
    fn as_any(&self) -> &dyn Any;
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidBody {
        message_id: 0,
        reason: reason.into(),
    }
}

/// Opaque body carrier for message ids without a registered type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody {
    pub data: Bytes,
}

impl RawBody {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl MessageBody for RawBody {
    fn encode_body(&self) -> Result<Bytes, ProtocolError> {
        Ok(self.data.clone())
    }

    fn decode_body(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        self.data = Bytes::copy_from_slice(body);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Body of messages that carry no fields, such as the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyBody;

impl MessageBody for EmptyBody {
    fn encode_body(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::new())
    }

    fn decode_body(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        if !body.is_empty() {
            return Err(invalid(format!("expected empty body, got {} bytes", body.len())));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// General response, sent by terminals (`0x0001`) and the platform (`0x8001`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneralResponse {
    /// Serial number of the message being answered.
    pub reply_serial: u16,
    /// Id of the message being answered.
    pub reply_id: u16,
    pub result: u8,
}

impl GeneralResponse {
    pub const SUCCESS: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const MESSAGE_ERROR: u8 = 2;
    pub const UNSUPPORTED: u8 = 3;
    pub const ALARM_ACK: u8 = 4;

    const LEN: usize = 5;

    pub fn new(reply_serial: u16, reply_id: u16, result: u8) -> Self {
        Self {
            reply_serial,
            reply_id,
            result,
        }
    }
}

impl MessageBody for GeneralResponse {
    fn encode_body(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u16(self.reply_serial);
        buf.put_u16(self.reply_id);
        buf.put_u8(self.result);
        Ok(buf.freeze())
    }

    fn decode_body(&mut self, mut body: &[u8]) -> Result<(), ProtocolError> {
        if body.len() < Self::LEN {
            return Err(invalid(format!(
                "general response needs {} bytes, got {}",
                Self::LEN,
                body.len()
            )));
        }
        self.reply_serial = body.get_u16();
        self.reply_id = body.get_u16();
        self.result = body.get_u8();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Platform reply to a terminal registration (`0x8100`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationResponse {
    pub reply_serial: u16,
    pub result: u8,
    /// Only present on the wire when `result` is [`Self::SUCCESS`]. Kept as
    /// raw bytes; terminals echo it back verbatim.
    pub auth_code: Bytes,
}

impl RegistrationResponse {
    pub const SUCCESS: u8 = 0;
    pub const VEHICLE_REGISTERED: u8 = 1;
    pub const VEHICLE_UNKNOWN: u8 = 2;
    pub const TERMINAL_REGISTERED: u8 = 3;
    pub const TERMINAL_UNKNOWN: u8 = 4;

    pub fn accepted(reply_serial: u16, auth_code: impl Into<Bytes>) -> Self {
        Self {
            reply_serial,
            result: Self::SUCCESS,
            auth_code: auth_code.into(),
        }
    }

    pub fn rejected(reply_serial: u16, result: u8) -> Self {
        Self {
            reply_serial,
            result,
            auth_code: Bytes::new(),
        }
    }
}

impl MessageBody for RegistrationResponse {
    fn encode_body(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(3 + self.auth_code.len());
        buf.put_u16(self.reply_serial);
        buf.put_u8(self.result);
        if self.result == Self::SUCCESS {
            buf.put_slice(&self.auth_code);
        }
        Ok(buf.freeze())
    }

    fn decode_body(&mut self, mut body: &[u8]) -> Result<(), ProtocolError> {
        if body.len() < 3 {
            return Err(invalid(format!(
                "registration response needs at least 3 bytes, got {}",
                body.len()
            )));
        }
        self.reply_serial = body.get_u16();
        self.result = body.get_u8();
        self.auth_code = if self.result == Self::SUCCESS {
            Bytes::copy_from_slice(body)
        } else {
            Bytes::new()
        };
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Constructs an empty body instance for a message id.
pub type BodyFactory = Arc<dyn Fn() -> Box<dyn MessageBody> + Send + Sync>;

/// Maps message ids to body factories.
///
/// Built once at startup and shared by reference with the codec.
#[derive(Clone, Default)]
pub struct BodyRegistry {
    factories: HashMap<u16, BodyFactory>,
}

impl BodyRegistry {
    /// Creates an empty registry; every id decodes to [`RawBody`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in bodies registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(msg_id::TERMINAL_GENERAL_RESPONSE, || {
            Box::new(GeneralResponse::default())
        });
        registry.register(msg_id::PLATFORM_GENERAL_RESPONSE, || {
            Box::new(GeneralResponse::default())
        });
        registry.register(msg_id::HEARTBEAT, || Box::new(EmptyBody));
        registry.register(msg_id::TERMINAL_LOGOUT, || Box::new(EmptyBody));
        registry.register(msg_id::REGISTRATION_RESPONSE, || {
            Box::new(RegistrationResponse::default())
        });
        registry
    }

    /// Registers a factory, replacing any previous one for the id.
    pub fn register<F>(&mut self, message_id: u16, factory: F)
    where
        F: Fn() -> Box<dyn MessageBody> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(message_id, Arc::new(factory))
            .is_some()
        {
            tracing::debug!("Replaced body factory for message {:#06x}", message_id);
        }
    }

    /// Returns whether a body type is registered for the id.
    pub fn is_supported(&self, message_id: u16) -> bool {
        self.factories.contains_key(&message_id)
    }

    /// Creates an empty body for the id, if one is registered.
    pub fn create(&self, message_id: u16) -> Option<Box<dyn MessageBody>> {
        self.factories.get(&message_id).map(|factory| factory())
    }

    /// Encodes a body.
    pub fn encode(&self, body: &dyn MessageBody) -> Result<Bytes, ProtocolError> {
        body.encode_body()
    }

    /// Decodes `bytes` as the body type registered for `message_id`, falling
    /// back to [`RawBody`] for unknown ids.
    pub fn decode(&self, message_id: u16, bytes: &[u8]) -> Result<Arc<dyn MessageBody>, ProtocolError> {
        let mut body = self
            .create(message_id)
            .unwrap_or_else(|| Box::new(RawBody::default()));
        body.decode_body(bytes).map_err(|e| match e {
            ProtocolError::InvalidBody { reason, .. } => ProtocolError::InvalidBody { message_id, reason },
            other => other,
        })?;
        Ok(Arc::from(body))
    }

    /// Returns the registered message ids in ascending order.
    pub fn message_ids(&self) -> Vec<u16> {
        let mut ids: Vec<_> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for BodyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyRegistry")
            .field("message_ids", &self.message_ids())
            .finish()
    }
}
