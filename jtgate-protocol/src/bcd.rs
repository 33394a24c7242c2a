//! Packed BCD terminal identifiers.
//!
//! Each nibble carries one decimal digit. Identifiers are left-padded with
//! zero digits on the wire and trimmed of leading zeros when decoded.

use crate::error::ProtocolError;
use bytes::BufMut;

/// Terminal id width before the 2019 revision (12 digits).
pub const TERMINAL_ID_LEN: usize = 6;

/// Terminal id width when the version byte is present (20 digits).
pub const TERMINAL_ID_LEN_2019: usize = 10;

/// Decodes packed BCD, dropping leading zero digits.
pub fn decode(bytes: &[u8]) -> Result<String, ProtocolError> {
    let mut digits = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let (hi, lo) = (b >> 4, b & 0x0F);
        if hi > 9 || lo > 9 {
            return Err(ProtocolError::InvalidBcd(b));
        }
        digits.push(char::from(b'0' + hi));
        digits.push(char::from(b'0' + lo));
    }
    Ok(digits.trim_start_matches('0').to_string())
}

/// Encodes `digits` as `width` bytes of packed BCD, left-padded with zeros.
pub fn encode_into(digits: &str, width: usize, dst: &mut impl BufMut) -> Result<(), ProtocolError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidTerminalId(format!(
            "'{}' contains non-decimal characters",
            digits
        )));
    }
    let capacity = width * 2;
    if digits.len() > capacity {
        return Err(ProtocolError::InvalidTerminalId(format!(
            "'{}' exceeds {} digits",
            digits, capacity
        )));
    }

    let padded: Vec<u8> = std::iter::repeat(0u8)
        .take(capacity - digits.len())
        .chain(digits.bytes().map(|b| b - b'0'))
        .collect();
    for pair in padded.chunks_exact(2) {
        dst.put_u8((pair[0] << 4) | pair[1]);
    }
    Ok(())
}

/// Encodes `digits` into a new buffer of `width` bytes.
pub fn encode(digits: &str, width: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(width);
    encode_into(digits, width, &mut out)?;
    Ok(out)
}
