//! LEB128 decoding for the variable-length streams of a DEX image.
//!
//! A 32-bit value never occupies more than five bytes; anything longer is
//! rejected as malformed rather than silently truncated.

use crate::dex::error::{DexError, DexErrorKind};

const MAX_BYTES: usize = 5;

pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u32, usize), DexError>
{
    let mut value: u32 = 0;
    let mut shift = 0;
    let mut count = 0;

    for &byte in encoded.iter().take(MAX_BYTES) {
        count += 1;
        value |= ((byte & 0x7F) as u32) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((value, count));
        }
    }

    if count == MAX_BYTES {
        fail!(DexErrorKind::MalformedLeb128, "uleb128 value exceeds five bytes");
    }
    fail!(DexErrorKind::MalformedLeb128, "uleb128 value runs past end of region")
}

pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i32, usize), DexError>
{
    let mut value: i32 = 0;
    let mut shift = 0;
    let mut count = 0;

    for &byte in encoded.iter().take(MAX_BYTES) {
        count += 1;
        value |= ((byte & 0x7F) as i32) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            if shift < 32 && (byte & 0x40) != 0 {
                value |= -1 << shift;
            }
            return Ok((value, count));
        }
    }

    if count == MAX_BYTES {
        fail!(DexErrorKind::MalformedLeb128, "sleb128 value exceeds five bytes");
    }
    fail!(DexErrorKind::MalformedLeb128, "sleb128 value runs past end of region")
}

/// ULEB128p1: the stored value is the logical value plus one, so that -1
/// ("no index") encodes as a single zero byte. Returned as `u32`, where the
/// "no index" case is `0xffffffff`.
pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Result<(u32, usize), DexError>
{
    let (v, c) = decode_uleb128(encoded)?;
    Ok((v.wrapping_sub(1), c))
}

// Encoders are only needed to assemble fixture images in tests.
#[cfg(test)]
pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    if remaining == 0 {
        result.push(0);
        return result;
    }

    while remaining != 0 {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);
    }

    result
}

#[cfg(test)]
pub(crate) fn encode_sleb128(value: i32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more = !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

#[cfg(test)]
pub(crate) fn encode_uleb128p1(value: i64) -> Vec<u8> {
    encode_uleb128((value + 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0x80, 0x7F], 16256),
            (vec![0xE5, 0x8E, 0x26], 624485),
            (vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::MAX),
        ];

        for (encoded, expected) in cases {
            let (v, c) = decode_uleb128(&encoded).unwrap();
            assert_eq!(v, expected);
            assert_eq!(c, encoded.len());
        }
    }

    #[test]
    fn test_decode_sleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], -1),
            (vec![0xFF, 0x00], 127),
            (vec![0x80, 0x7F], -128),
            (vec![0xC0, 0xBB, 0x78], -123456),
        ];

        for (encoded, expected) in cases {
            let (v, _) = decode_sleb128(&encoded).unwrap();
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn test_decode_uleb128p1() {
        let (v, _) = decode_uleb128p1(&[0x00]).unwrap();
        assert_eq!(v, 0xffffffff);
        let (v, _) = decode_uleb128p1(&[0x01]).unwrap();
        assert_eq!(v, 0);
        let (v, _) = decode_uleb128p1(&[0x80, 0x01]).unwrap();
        assert_eq!(v, 127);
    }

    #[test]
    fn test_decode_rejects_overlong() {
        let encoded = vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = decode_uleb128(&encoded).unwrap_err();
        assert_eq!(err.kind(), crate::dex::error::DexErrorKind::MalformedLeb128);
        assert!(decode_sleb128(&encoded).is_err());
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let encoded = vec![0x80, 0x80];
        let err = decode_uleb128(&encoded).unwrap_err();
        assert_eq!(err.kind(), crate::dex::error::DexErrorKind::MalformedLeb128);
        assert!(decode_uleb128(&[]).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for value in [0u32, 1, 127, 128, 16256, 624485] {
            let encoded = encode_uleb128(value);
            let (v, c) = decode_uleb128(&encoded).unwrap();
            assert_eq!(v, value);
            assert_eq!(c, encoded.len());
        }
        for value in [0i32, 1, -1, -128, -123456] {
            let encoded = encode_sleb128(value);
            let (v, _) = decode_sleb128(&encoded).unwrap();
            assert_eq!(v, value);
        }
    }
}
