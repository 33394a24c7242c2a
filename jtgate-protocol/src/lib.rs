//! # jtgate-protocol
//!
//! Wire protocol implementation for jtgate (JT/T 808 terminal protocol).
//!
//! This crate provides:
//! - Byte stuffing against the `0x7E` sentinel and `0x7D` escape bytes
//! - XOR checksums
//! - Header and body-properties bit layout, including the 2019 version byte
//!   and subpackage info
//! - A body registry that resolves message ids to body types
//! - Frame encoding/decoding, stream re-framing and subpackage reassembly

pub mod bcd;
pub mod body;
pub mod checksum;
pub mod codec;
pub mod error;
pub mod escape;
pub mod frame;
pub mod header;
pub mod message;
pub mod subpackage;

pub use body::{BodyRegistry, EmptyBody, GeneralResponse, MessageBody, RawBody, RegistrationResponse};
pub use codec::{Decoder, Encoder, StreamDecoder};
pub use error::ProtocolError;
pub use frame::Frame;
pub use header::{BodyProperties, Header, SubpackageInfo};
pub use message::{msg_id, Message};
pub use subpackage::Reassembler;

/// Frame delimiter.
pub const SENTINEL: u8 = 0x7E;

/// Escape introducer.
pub const ESCAPE: u8 = 0x7D;

/// Largest body length the 10-bit length field can carry.
pub const MAX_BODY_LEN: usize = 0x03FF;

/// Smallest unstuffed header: id, properties, 6-byte terminal id, serial.
pub const MIN_HEADER_LEN: usize = 2 + 2 + 6 + 2;

/// Smallest complete frame: two sentinels, minimum header and checksum.
pub const MIN_FRAME_LEN: usize = 1 + MIN_HEADER_LEN + 1 + 1;

/// Default port for the jtgate terminal listener.
pub const DEFAULT_PORT: u16 = 6808;
