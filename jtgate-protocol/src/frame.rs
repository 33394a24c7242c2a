//! Frame layout for JT/T 808.
//!
//! ```text
//! +------+---------------------------------------------------+------+
//! | 0x7E | stuffed( header | body | checksum )                | 0x7E |
//! +------+---------------------------------------------------+------+
//! ```
//!
//! The checksum is the XOR of every unstuffed byte from the message id
//! through the end of the body. Stuffing is applied after the checksum is
//! computed and covers the checksum byte itself.

use crate::checksum;
use crate::error::{ProtocolError, SentinelPosition};
use crate::escape;
use crate::header::Header;
use crate::{MIN_FRAME_LEN, SENTINEL};
use bytes::{BufMut, Bytes, BytesMut};

/// A frame whose header is decoded and whose body is still raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Encodes the frame, sentinels included.
    ///
    /// The body length in the properties field is taken from `self.body`.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut raw = BytesMut::with_capacity(self.header.encoded_len() + self.body.len() + 1);
        self.header.encode(self.body.len(), &mut raw)?;
        raw.put_slice(&self.body);
        let sum = checksum::xor(&raw);
        raw.put_u8(sum);

        let escapes = escape::count_escape_bytes(&raw);
        let mut out = BytesMut::with_capacity(escape::escaped_len(raw.len(), escapes) + 2);
        out.put_u8(SENTINEL);
        escape::escape_into(&raw, &mut out);
        out.put_u8(SENTINEL);
        Ok(out)
    }

    /// Decodes one complete frame, sentinels included.
    ///
    /// Bytes following the checksum are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if bytes[0] != SENTINEL {
            return Err(ProtocolError::MissingSentinel(SentinelPosition::Start));
        }
        if bytes[bytes.len() - 1] != SENTINEL {
            return Err(ProtocolError::MissingSentinel(SentinelPosition::End));
        }
        if bytes.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::TooShort {
                len: bytes.len(),
                min: MIN_FRAME_LEN,
            });
        }

        let raw = escape::unescape(&bytes[1..bytes.len() - 1])?;

        let mut cursor = &raw[..];
        let header = Header::decode(&mut cursor)?;
        let header_len = raw.len() - cursor.len();

        let body_len = header.body_len();
        if cursor.len() < body_len + 1 {
            return Err(ProtocolError::TruncatedBody {
                declared: body_len,
                available: cursor.len().saturating_sub(1),
            });
        }

        let checksum_offset = header_len + body_len;
        let expected = raw[checksum_offset];
        let actual = checksum::checksum(&raw, 0, checksum_offset);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        let trailing = raw.len() - checksum_offset - 1;
        if trailing > 0 {
            tracing::trace!(
                "Ignoring {} trailing bytes after checksum of message {:#06x}",
                trailing,
                header.message_id
            );
        }

        let body = Bytes::copy_from_slice(&raw[header_len..checksum_offset]);
        Ok(Self { header, body })
    }
}
