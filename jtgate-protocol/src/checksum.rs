//! XOR checksum over the unstuffed header and body.

/// XORs `bytes[offset..offset + length]` into a single byte.
///
/// # Panics
///
/// Panics if the range is out of bounds.
pub fn checksum(bytes: &[u8], offset: usize, length: usize) -> u8 {
    xor(&bytes[offset..offset + length])
}

/// XORs every byte of `bytes`.
pub fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Returns whether the XOR of `bytes` equals `expected`.
pub fn verify(bytes: &[u8], expected: u8) -> bool {
    xor(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_range() {
        let data = [0xFF, 0x01, 0x02, 0x04, 0xFF];
        assert_eq!(checksum(&data, 1, 3), 0x07);
        assert_eq!(checksum(&data, 0, 0), 0x00);
        assert_eq!(checksum(&data, 0, data.len()), 0x07);
    }

    #[test]
    fn test_verify() {
        let data = [0x00, 0x02, 0x00, 0x00];
        assert!(verify(&data, 0x02));
        assert!(!verify(&data, 0x03));
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(xor(&data), xor(&data));
        assert_eq!(xor(&data), checksum(&data, 0, data.len()));
    }

    #[test]
    #[should_panic]
    fn test_checksum_out_of_bounds() {
        checksum(&[0x01, 0x02], 1, 5);
    }
}
