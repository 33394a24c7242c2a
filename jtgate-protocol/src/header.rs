//! Message header model.
//!
//! Header layout (unstuffed, big-endian):
//!
//! ```text
//! +------------+------------+-----------+-------------+--------+-------------------+
//! | message_id | properties | [version] | terminal_id | serial | [total | seq]     |
//! |  2 bytes   |  2 bytes   |  1 byte   | BCD 6 or 10 | 2 bytes| 2 bytes | 2 bytes |
//! +------------+------------+-----------+-------------+--------+-------------------+
//! ```
//!
//! Body properties, MSB to LSB: bit 15 reserved, bit 14 version present,
//! bit 13 subpackaged, bits 12-10 encryption mode, bits 9-0 body length.

use crate::bcd::{self, TERMINAL_ID_LEN, TERMINAL_ID_LEN_2019};
use crate::error::ProtocolError;
use crate::MAX_BODY_LEN;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;

/// The 16-bit body properties field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BodyProperties(u16);

impl BodyProperties {
    /// Body length mask (bits 0-9).
    pub const LENGTH_MASK: u16 = 0x03FF;
    /// Encryption mode mask (bits 10-12).
    pub const ENCRYPTION_MASK: u16 = 0x1C00;
    /// Subpackage info follows the serial number.
    pub const SUBPACKAGE: u16 = 1 << 13;
    /// A protocol version byte follows the properties.
    pub const VERSION: u16 = 1 << 14;
    /// Reserved.
    pub const RESERVED: u16 = 1 << 15;

    const ENCRYPTION_SHIFT: u16 = 10;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn with_body_len(mut self, len: usize) -> Result<Self, ProtocolError> {
        if len > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge {
                size: len,
                max: MAX_BODY_LEN,
            });
        }
        self.0 = (self.0 & !Self::LENGTH_MASK) | len as u16;
        Ok(self)
    }

    pub fn with_encryption(mut self, mode: u8) -> Self {
        let mode = (u16::from(mode) << Self::ENCRYPTION_SHIFT) & Self::ENCRYPTION_MASK;
        self.0 = (self.0 & !Self::ENCRYPTION_MASK) | mode;
        self
    }

    pub fn with_subpackage(mut self, enabled: bool) -> Self {
        self.set(Self::SUBPACKAGE, enabled);
        self
    }

    pub fn with_version(mut self, enabled: bool) -> Self {
        self.set(Self::VERSION, enabled);
        self
    }

    fn set(&mut self, flag: u16, enabled: bool) {
        if enabled {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }

    pub fn body_len(&self) -> usize {
        (self.0 & Self::LENGTH_MASK) as usize
    }

    pub fn encryption(&self) -> u8 {
        ((self.0 & Self::ENCRYPTION_MASK) >> Self::ENCRYPTION_SHIFT) as u8
    }

    pub fn is_subpackage(&self) -> bool {
        self.0 & Self::SUBPACKAGE != 0
    }

    pub fn has_version(&self) -> bool {
        self.0 & Self::VERSION != 0
    }
}

/// Position of one frame within a subpackaged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubpackageInfo {
    /// Total number of packages.
    pub total: u16,
    /// 1-based sequence of this package.
    pub seq: u16,
}

impl SubpackageInfo {
    pub fn new(total: u16, seq: u16) -> Self {
        Self { total, seq }
    }

    /// Whether `seq` lies within `1..=total`.
    pub fn is_valid(&self) -> bool {
        self.total > 0 && self.seq >= 1 && self.seq <= self.total
    }
}

/// A decoded message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub message_id: u16,
    pub properties: BodyProperties,
    pub protocol_version: Option<u8>,
    pub terminal_id: String,
    pub serial_number: u16,
    pub subpackage: Option<SubpackageInfo>,
}

impl Header {
    /// Creates a pre-2019 header with no body, encryption or subpackaging.
    pub fn new(message_id: u16, terminal_id: impl Into<String>, serial_number: u16) -> Self {
        Self {
            message_id,
            properties: BodyProperties::new(),
            protocol_version: None,
            terminal_id: terminal_id.into(),
            serial_number,
            subpackage: None,
        }
    }

    /// Switches to the 2019 layout (version byte, 10-byte terminal id).
    pub fn with_version(mut self, version: u8) -> Self {
        self.protocol_version = Some(version);
        self.properties = self.properties.with_version(true);
        self
    }

    pub fn with_subpackage(mut self, total: u16, seq: u16) -> Self {
        self.subpackage = Some(SubpackageInfo::new(total, seq));
        self.properties = self.properties.with_subpackage(true);
        self
    }

    pub fn with_encryption(mut self, mode: u8) -> Self {
        self.properties = self.properties.with_encryption(mode);
        self
    }

    /// Body length as declared by the properties field.
    pub fn body_len(&self) -> usize {
        self.properties.body_len()
    }

    fn terminal_id_width(&self) -> usize {
        if self.protocol_version.is_some() {
            TERMINAL_ID_LEN_2019
        } else {
            TERMINAL_ID_LEN
        }
    }

    /// Length of this header on the wire, before stuffing.
    pub fn encoded_len(&self) -> usize {
        let mut len = 2 + 2 + self.terminal_id_width() + 2;
        if self.protocol_version.is_some() {
            len += 1;
        }
        if self.subpackage.is_some() {
            len += 4;
        }
        len
    }

    /// Properties as they will be written for a body of `body_len` bytes.
    ///
    /// Length and flags are derived from the body and the optional fields,
    /// never from whatever the caller left in `properties`.
    pub fn properties_for(&self, body_len: usize) -> Result<BodyProperties, ProtocolError> {
        Ok(BodyProperties::new()
            .with_encryption(self.properties.encryption())
            .with_version(self.protocol_version.is_some())
            .with_subpackage(self.subpackage.is_some())
            .with_body_len(body_len)?)
    }

    /// Decodes a header from the front of `buf`, advancing past it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let available = buf.len();
        if available < 4 {
            return Err(ProtocolError::TruncatedHeader {
                needed: 4,
                available,
            });
        }

        let message_id = buf.get_u16();
        let properties = BodyProperties::from_bits(buf.get_u16());

        let terminal_width = if properties.has_version() {
            TERMINAL_ID_LEN_2019
        } else {
            TERMINAL_ID_LEN
        };
        let needed = 4
            + usize::from(properties.has_version())
            + terminal_width
            + 2
            + if properties.is_subpackage() { 4 } else { 0 };
        if available < needed {
            return Err(ProtocolError::TruncatedHeader { needed, available });
        }

        let protocol_version = if properties.has_version() {
            Some(buf.get_u8())
        } else {
            None
        };

        let terminal_id = bcd::decode(&buf[..terminal_width])?;
        buf.advance(terminal_width);

        let serial_number = buf.get_u16();

        let subpackage = if properties.is_subpackage() {
            let total = buf.get_u16();
            let seq = buf.get_u16();
            Some(SubpackageInfo { total, seq })
        } else {
            None
        };

        Ok(Self {
            message_id,
            properties,
            protocol_version,
            terminal_id,
            serial_number,
            subpackage,
        })
    }

    /// Encodes this header for a body of `body_len` bytes.
    pub fn encode(&self, body_len: usize, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let properties = self.properties_for(body_len)?;
        dst.reserve(self.encoded_len());

        dst.put_u16(self.message_id);
        dst.put_u16(properties.bits());
        if let Some(version) = self.protocol_version {
            dst.put_u8(version);
        }
        bcd::encode_into(&self.terminal_id, self.terminal_id_width(), dst)?;
        dst.put_u16(self.serial_number);
        if let Some(sub) = self.subpackage {
            dst.put_u16(sub.total);
            dst.put_u16(sub.seq);
        }
        Ok(())
    }
}
