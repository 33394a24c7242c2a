//! Byte stuffing for frame interiors.
//!
//! Everything between the two sentinels is transcoded so that the payload
//! never contains a bare sentinel:
//!
//! ```text
//! 0x7E -> 0x7D 0x02
//! 0x7D -> 0x7D 0x01
//! ```

use crate::error::ProtocolError;
use crate::{ESCAPE, SENTINEL};
use bytes::{BufMut, BytesMut};

const ESCAPED_ESCAPE: u8 = 0x01;
const ESCAPED_SENTINEL: u8 = 0x02;

/// Returns whether any byte of `bytes` must be escaped.
pub fn needs_escape(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b == SENTINEL || b == ESCAPE)
}

/// Counts the extra bytes escaping `bytes` would add.
pub fn count_escape_bytes(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .filter(|&&b| b == SENTINEL || b == ESCAPE)
        .count()
}

/// Length of a buffer after escaping, given its raw length and escape count.
pub fn escaped_len(raw_len: usize, escape_count: usize) -> usize {
    raw_len + escape_count
}

/// Appends the escaped form of `bytes` to `dst`.
pub fn escape_into(bytes: &[u8], dst: &mut BytesMut) {
    dst.reserve(escaped_len(bytes.len(), count_escape_bytes(bytes)));
    for &b in bytes {
        match b {
            SENTINEL => {
                dst.put_u8(ESCAPE);
                dst.put_u8(ESCAPED_SENTINEL);
            }
            ESCAPE => {
                dst.put_u8(ESCAPE);
                dst.put_u8(ESCAPED_ESCAPE);
            }
            _ => dst.put_u8(b),
        }
    }
}

/// Escapes `bytes` into a new buffer.
pub fn escape(bytes: &[u8]) -> BytesMut {
    let mut dst = BytesMut::new();
    escape_into(bytes, &mut dst);
    dst
}

/// Reverses [`escape`].
///
/// Fails on a `0x7D` that is not followed by `0x01`/`0x02` and on a bare
/// sentinel, which cannot appear inside an escaped buffer.
pub fn unescape(bytes: &[u8]) -> Result<BytesMut, ProtocolError> {
    let mut dst = BytesMut::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            ESCAPE => {
                match bytes.get(i + 1) {
                    Some(&ESCAPED_ESCAPE) => dst.put_u8(ESCAPE),
                    Some(&ESCAPED_SENTINEL) => dst.put_u8(SENTINEL),
                    _ => return Err(ProtocolError::MalformedEscape { offset: i }),
                }
                i += 2;
            }
            SENTINEL => return Err(ProtocolError::UnescapedSentinel { offset: i }),
            b => {
                dst.put_u8(b);
                i += 1;
            }
        }
    }
    Ok(dst)
}

/// Checks that `bytes` is a well-formed escaped buffer without decoding it.
pub fn validate_escaped(bytes: &[u8]) -> Result<(), ProtocolError> {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            ESCAPE => match bytes.get(i + 1) {
                Some(&ESCAPED_ESCAPE) | Some(&ESCAPED_SENTINEL) => i += 2,
                _ => return Err(ProtocolError::MalformedEscape { offset: i }),
            },
            SENTINEL => return Err(ProtocolError::UnescapedSentinel { offset: i }),
            _ => i += 1,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_reserved_bytes() {
        let escaped = escape(&[0x30, 0x7E, 0x08, 0x7D, 0x55]);
        assert_eq!(
            escaped.as_ref(),
            &[0x30, 0x7D, 0x02, 0x08, 0x7D, 0x01, 0x55]
        );
    }

    #[test]
    fn test_unescape_reserved_bytes() {
        let raw = unescape(&[0x30, 0x7D, 0x02, 0x08, 0x7D, 0x01, 0x55]).unwrap();
        assert_eq!(raw.as_ref(), &[0x30, 0x7E, 0x08, 0x7D, 0x55]);
    }

    #[test]
    fn test_plain_bytes_pass_through() {
        let data = [0x01, 0x02, 0x03, 0x7C, 0x7F];
        assert!(!needs_escape(&data));
        assert_eq!(escape(&data).as_ref(), &data);
        assert_eq!(unescape(&data).unwrap().as_ref(), &data);
    }

    #[test]
    fn test_dangling_escape_is_malformed() {
        let result = unescape(&[0x01, 0x7D]);
        assert_eq!(result, Err(ProtocolError::MalformedEscape { offset: 1 }));
    }

    #[test]
    fn test_unknown_escape_follower_is_malformed() {
        let result = unescape(&[0x7D, 0x03]);
        assert_eq!(result, Err(ProtocolError::MalformedEscape { offset: 0 }));
    }

    #[test]
    fn test_bare_sentinel_rejected() {
        assert_eq!(
            unescape(&[0x01, 0x7E]),
            Err(ProtocolError::UnescapedSentinel { offset: 1 })
        );
        assert_eq!(
            validate_escaped(&[0x01, 0x02, 0x7E]),
            Err(ProtocolError::UnescapedSentinel { offset: 2 })
        );
        assert!(validate_escaped(&[0x7D, 0x02, 0x7D, 0x01]).is_ok());
    }

    #[test]
    fn test_escape_length_helpers() {
        let data = [0x7E, 0x7D, 0x00, 0x7E];
        assert!(needs_escape(&data));
        assert_eq!(count_escape_bytes(&data), 3);
        assert_eq!(escaped_len(data.len(), 3), 7);
        assert_eq!(escape(&data).len(), 7);
    }

    proptest! {
        #[test]
        fn prop_unescape_inverts_escape(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let escaped = escape(&data);
            prop_assert!(!escaped.contains(&SENTINEL));
            prop_assert!(validate_escaped(&escaped).is_ok());
            let unescaped = unescape(&escaped).unwrap();
            prop_assert_eq!(unescaped.as_ref(), data.as_slice());
        }

        #[test]
        fn prop_escaped_len_matches(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let expected = escaped_len(data.len(), count_escape_bytes(&data));
            prop_assert_eq!(escape(&data).len(), expected);
        }
    }
}
