//! Base-128 variable-length integers (MultiByteInt31).
//!
//! Every size in the binary framing and binary XML formats is written as a
//! little-endian sequence of 7-bit groups, with `0x80` set on every group
//! except the last. At most five groups are allowed, and the fifth may only
//! carry the low 3 bits, so the encodable domain is `0..=0x7FFF_FFFF`.

use bytes::BufMut;

use crate::error::{FrameError, Result};

/// Largest value that fits in five groups with a 3-bit final group.
pub const MAX_VARINT: u32 = 0x7FFF_FFFF;

/// Maximum number of bytes an encoded value may occupy.
pub const MAX_VARINT_LEN: usize = 5;

const CONTINUATION: u8 = 0x80;
const FINAL_GROUP_MASK: u8 = 0xF8;

/// Append the encoding of `value` to `dst`.
pub fn encode(value: u32, dst: &mut impl BufMut) -> Result<usize> {
    if value > MAX_VARINT {
        return Err(FrameError::VarintOverflow);
    }

    let mut remaining = value;
    let mut written = 0usize;
    while remaining >= 0x80 {
        dst.put_u8((remaining & 0x7F) as u8 | CONTINUATION);
        remaining >>= 7;
        written += 1;
    }
    dst.put_u8(remaining as u8);
    Ok(written + 1)
}

/// Number of bytes [`encode`] emits for `value`.
pub fn encoded_size(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode one complete value from the front of `src`.
///
/// Returns `Ok(None)` if `src` ends before the final group.
pub fn decode_varint(src: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut decoder = VarintDecoder::new();
    let consumed = decoder.decode(src)?;
    if decoder.is_done() {
        Ok(Some((decoder.value(), consumed)))
    } else {
        Ok(None)
    }
}

/// Resumable decoder that accumulates a value across buffer boundaries.
#[derive(Debug, Default, Clone)]
pub struct VarintDecoder {
    index: usize,
    value: u32,
    done: bool,
}

impl VarintDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes from `src` until the value is complete or `src` runs out.
    ///
    /// Returns the number of bytes consumed. Calling again after completion
    /// consumes nothing; call [`reset`](Self::reset) to decode the next value.
    pub fn decode(&mut self, src: &[u8]) -> Result<usize> {
        let mut consumed = 0usize;
        while !self.done && consumed < src.len() {
            let next = src[consumed];
            consumed += 1;

            if self.index == MAX_VARINT_LEN - 1 && next & FINAL_GROUP_MASK != 0 {
                return Err(FrameError::VarintOverflow);
            }

            self.value |= u32::from(next & 0x7F) << (self.index * 7);
            self.index += 1;
            if next & CONTINUATION == 0 {
                self.done = true;
            }
        }
        Ok(consumed)
    }

    /// True once the final group has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The accumulated value. Only meaningful once [`is_done`](Self::is_done).
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;

    fn encoded(value: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode(value, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(0x7F), vec![0x7F]);
        assert_eq!(encoded(0x80), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xAC, 0x02]);
        assert_eq!(encoded(MAX_VARINT), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
    }

    #[test]
    fn encode_rejects_values_above_31_bits() {
        let mut buf = BytesMut::new();
        let err = encode(MAX_VARINT + 1, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::VarintOverflow));
        assert!(buf.is_empty());
    }

    #[test]
    fn encoded_size_boundaries() {
        let boundaries = [
            0, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0x0FFF_FFFF, 0x1000_0000,
        ];
        for value in boundaries {
            assert_eq!(encoded_size(value), encoded(value).len(), "value {value:#x}");
        }
    }

    #[test]
    fn fifth_group_with_high_bits_fails() {
        let err = decode_varint(&[0xFF, 0xFF, 0xFF, 0xFF, 0x08]).unwrap_err();
        assert!(matches!(err, FrameError::VarintOverflow));

        let err = decode_varint(&[0x80, 0x80, 0x80, 0x80, 0x80]).unwrap_err();
        assert!(matches!(err, FrameError::VarintOverflow));
    }

    #[test]
    fn incomplete_input_returns_none() {
        assert!(decode_varint(&[0x80, 0x80]).unwrap().is_none());
        assert!(decode_varint(&[]).unwrap().is_none());
    }

    #[test]
    fn resumable_across_slices() {
        let bytes = encoded(0x0ABC_DEF0);
        let mut decoder = VarintDecoder::new();
        for chunk in bytes.chunks(1) {
            assert!(!decoder.is_done());
            assert_eq!(decoder.decode(chunk).unwrap(), 1);
        }
        assert!(decoder.is_done());
        assert_eq!(decoder.value(), 0x0ABC_DEF0);

        // A finished decoder ignores further input until reset.
        assert_eq!(decoder.decode(&[0x05]).unwrap(), 0);
        decoder.reset();
        decoder.decode(&[0x05]).unwrap();
        assert_eq!(decoder.value(), 5);
    }

    #[test]
    fn decode_stops_at_value_boundary() {
        let mut bytes = encoded(300);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let (value, consumed) = decode_varint(&bytes).unwrap().unwrap();
        assert_eq!(value, 300);
        assert_eq!(consumed, 2);
    }

    proptest! {
        #[test]
        fn roundtrip_matches_encoded_size(value in 0..=MAX_VARINT) {
            let bytes = encoded(value);
            prop_assert_eq!(bytes.len(), encoded_size(value));
            let (decoded, consumed) = decode_varint(&bytes).unwrap().unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, bytes.len());
        }
    }
}
