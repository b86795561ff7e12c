use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::record::{KnownEncoding, RecordLayout, RecordType};
use crate::varint::VarintDecoder;

/// Pulls framing records off a blocking byte stream.
///
/// The reader follows each record's layout and never consumes bytes past the
/// end of the record it returns, so the stream stays positioned on a record
/// boundary. It reads the type byte and size one byte at a time; wrap
/// unbuffered streams in a [`std::io::BufReader`].
pub struct FrameReader<R> {
    stream: R,
    max_payload: usize,
    via: Option<String>,
    content_type: Option<String>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_max_payload(stream, DEFAULT_MAX_PAYLOAD)
    }

    /// Reject sized records that declare more than `max_payload` bytes.
    pub fn with_max_payload(stream: R, max_payload: usize) -> Self {
        Self {
            stream,
            max_payload,
            via: None,
            content_type: None,
        }
    }

    /// Read the next record.
    ///
    /// End of stream before the type byte, or anywhere inside a record, is
    /// reported as [`FrameError::ConnectionClosed`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        let first = self.next_byte()?.ok_or(FrameError::ConnectionClosed)?;
        let record = RecordType::try_from(first)?;

        let payload = match record.layout() {
            RecordLayout::Empty => Bytes::new(),
            RecordLayout::Fixed(len) => self.read_payload(len)?,
            RecordLayout::Sized => {
                let len = self.read_size()?;
                self.read_payload(len)?
            }
        };

        match record {
            RecordType::Via => self.via = Some(String::from_utf8_lossy(&payload).into_owned()),
            RecordType::KnownEncoding => {
                let known = KnownEncoding::try_from(payload[0])?;
                self.content_type = Some(known.content_type().to_owned());
            }
            RecordType::ExtensibleEncoding => {
                self.content_type = Some(String::from_utf8_lossy(&payload).into_owned());
            }
            _ => {}
        }
        tracing::trace!(record = record.name(), size = payload.len(), "record read");
        Ok(Frame { record, payload })
    }

    /// Read records until the next `SizedEnvelope` and return its payload.
    ///
    /// Preamble records on the way are consumed; a `Via` among them is kept
    /// and available from [`via`](Self::via). Returns `Ok(None)` on `End`.
    pub fn read_envelope(&mut self) -> Result<Option<Bytes>> {
        loop {
            let frame = self.read_frame()?;
            match frame.record {
                RecordType::SizedEnvelope => return Ok(Some(frame.payload)),
                RecordType::End => return Ok(None),
                skipped => tracing::debug!(record = skipped.name(), "skipped record"),
            }
        }
    }

    /// The address from the most recent `Via` record.
    pub fn via(&self) -> Option<&str> {
        self.via.as_deref()
    }

    /// The content type named by the most recent encoding record.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn into_inner(self) -> R {
        self.stream
    }

    fn read_size(&mut self) -> Result<usize> {
        let mut size = VarintDecoder::new();
        while !size.is_done() {
            let byte = self.next_byte()?.ok_or(FrameError::ConnectionClosed)?;
            size.decode(&[byte])?;
        }
        let len = size.value() as usize;
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.max_payload,
            });
        }
        Ok(len)
    }

    fn read_payload(&mut self, len: usize) -> Result<Bytes> {
        let mut payload = BytesMut::zeroed(len);
        self.stream
            .read_exact(&mut payload)
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })?;
        Ok(payload.freeze())
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }
}
