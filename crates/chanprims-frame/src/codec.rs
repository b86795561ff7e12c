use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::record::{RecordLayout, RecordType};
use crate::varint::{self, VarintDecoder, MAX_VARINT};

/// Default maximum payload size: 64 KiB, the default max received message size.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// A single framing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The record type.
    pub record: RecordType,
    /// The record payload (empty for type-only records).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(record: RecordType, payload: impl Into<Bytes>) -> Self {
        Self {
            record,
            payload: payload.into(),
        }
    }

    /// A `SizedEnvelope` record carrying one encoded message.
    pub fn envelope(payload: impl Into<Bytes>) -> Self {
        Self::new(RecordType::SizedEnvelope, payload)
    }

    /// A type-only record such as `End` or `PreambleAck`.
    pub fn marker(record: RecordType) -> Self {
        Self::new(record, Bytes::new())
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        match self.record.layout() {
            RecordLayout::Empty => 1,
            RecordLayout::Fixed(len) => 1 + len,
            RecordLayout::Sized => {
                1 + varint::encoded_size(self.payload.len() as u32) + self.payload.len()
            }
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────────────┬───────────────────┐
/// │ Type (1B)  │ Size (varint, Sized) │ Payload           │
/// └────────────┴──────────────────────┴───────────────────┘
/// ```
pub fn encode_frame(record: RecordType, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    match record.layout() {
        RecordLayout::Empty => {
            check_length(record, 0, payload.len())?;
            dst.put_u8(record as u8);
        }
        RecordLayout::Fixed(len) => {
            check_length(record, len, payload.len())?;
            dst.reserve(1 + len);
            dst.put_u8(record as u8);
            dst.put_slice(payload);
        }
        RecordLayout::Sized => {
            if payload.len() > MAX_VARINT as usize {
                return Err(FrameError::PayloadTooLarge {
                    size: payload.len(),
                    max: MAX_VARINT as usize,
                });
            }
            dst.reserve(1 + varint::MAX_VARINT_LEN + payload.len());
            dst.put_u8(record as u8);
            varint::encode(payload.len() as u32, dst)?;
            dst.put_slice(payload);
        }
    }
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    let record = RecordType::try_from(first)?;

    match record.layout() {
        RecordLayout::Empty => {
            src.advance(1);
            Ok(Some(Frame::marker(record)))
        }
        RecordLayout::Fixed(len) => {
            if src.len() < 1 + len {
                return Ok(None);
            }
            src.advance(1);
            let payload = src.split_to(len).freeze();
            Ok(Some(Frame { record, payload }))
        }
        RecordLayout::Sized => {
            let mut size = VarintDecoder::new();
            let consumed = size.decode(&src[1..])?;
            if !size.is_done() {
                return Ok(None); // Need more data
            }

            let payload_len = size.value() as usize;
            if payload_len > max_payload {
                return Err(FrameError::PayloadTooLarge {
                    size: payload_len,
                    max: max_payload,
                });
            }

            let header = 1 + consumed;
            if src.len() < header + payload_len {
                return Ok(None);
            }

            src.advance(header);
            let payload = src.split_to(payload_len).freeze();
            Ok(Some(Frame { record, payload }))
        }
    }
}

fn check_length(record: RecordType, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(FrameError::InvalidRecordLength {
            record: record.name(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_envelope() {
        let mut buf = BytesMut::new();
        let payload = b"hello, chanprims!";

        encode_frame(RecordType::SizedEnvelope, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), 1 + 1 + payload.len());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(frame.record, RecordType::SizedEnvelope);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut buf = BytesMut::new();
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_size() {
        let mut buf = BytesMut::from(&[RecordType::SizedEnvelope as u8, 0x80][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(RecordType::Via, b"test://host/svc", &mut buf).unwrap();
        buf.truncate(5);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_unknown_record() {
        let mut buf = BytesMut::from(&[0x42, 0x00][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::UnknownRecord(0x42))));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u8(RecordType::SizedEnvelope as u8);
        varint::encode(1024 * 1024, &mut buf).unwrap();

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_fixed_record_length_enforced() {
        let mut buf = BytesMut::new();
        let err = encode_frame(RecordType::Version, &[1], &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidRecordLength { expected: 2, .. }));
    }

    #[test]
    fn test_preamble_sequence() {
        let mut buf = BytesMut::new();
        encode_frame(RecordType::Version, &[1, 0], &mut buf).unwrap();
        encode_frame(RecordType::Mode, &[0x02], &mut buf).unwrap();
        encode_frame(RecordType::Via, b"test://localhost/echo", &mut buf).unwrap();
        encode_frame(RecordType::KnownEncoding, &[0x08], &mut buf).unwrap();
        encode_frame(RecordType::PreambleEnd, &[], &mut buf).unwrap();

        let records: Vec<RecordType> = std::iter::from_fn(|| {
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap()
        })
        .map(|f| f.record)
        .collect();

        assert_eq!(
            records,
            vec![
                RecordType::Version,
                RecordType::Mode,
                RecordType::Via,
                RecordType::KnownEncoding,
                RecordType::PreambleEnd
            ]
        );
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::envelope(vec![0u8; 200]);
        let mut buf = BytesMut::new();
        encode_frame(frame.record, &frame.payload, &mut buf).unwrap();
        assert_eq!(frame.wire_size(), buf.len());
        assert_eq!(Frame::marker(RecordType::End).wire_size(), 1);
    }
}
