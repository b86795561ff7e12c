use std::io::{self, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::record::{FramingMode, KnownEncoding, RecordLayout, RecordType};

/// Framing protocol version written in the `Version` record.
pub const FRAMING_VERSION: [u8; 2] = [1, 0];

/// How a preamble names the message encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleEncoding<'a> {
    Known(KnownEncoding),
    /// A content type carried in an `ExtensibleEncoding` record.
    Extensible(&'a str),
}

impl<'a> PreambleEncoding<'a> {
    /// `KnownEncoding` when the content type has one, else extensible.
    pub fn for_content_type(content_type: &'a str) -> Self {
        KnownEncoding::from_content_type(content_type)
            .map_or(Self::Extensible(content_type), Self::Known)
    }
}

/// Writes framing records to a blocking byte stream.
///
/// Each record is encoded into a scratch buffer and written whole, then the
/// stream is flushed.
pub struct FrameWriter<W> {
    stream: W,
    max_payload: usize,
    scratch: BytesMut,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self::with_max_payload(stream, DEFAULT_MAX_PAYLOAD)
    }

    /// Refuse sized records with more than `max_payload` bytes.
    pub fn with_max_payload(stream: W, max_payload: usize) -> Self {
        Self {
            stream,
            max_payload,
            scratch: BytesMut::new(),
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_record(frame.record, &frame.payload)
    }

    pub fn write_record(&mut self, record: RecordType, payload: &[u8]) -> Result<()> {
        if record.layout() == RecordLayout::Sized && payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        self.scratch.clear();
        encode_frame(record, payload, &mut self.scratch)?;
        self.stream
            .write_all(&self.scratch)
            .and_then(|()| self.stream.flush())
            .map_err(|err| match err.kind() {
                io::ErrorKind::WriteZero => FrameError::ConnectionClosed,
                _ => FrameError::Io(err),
            })?;
        tracing::trace!(record = record.name(), size = payload.len(), "record written");
        Ok(())
    }

    /// Write the `Version`, `Mode`, `Via` and encoding records that open a
    /// connection.
    pub fn write_preamble(
        &mut self,
        mode: FramingMode,
        via: &str,
        encoding: PreambleEncoding<'_>,
    ) -> Result<()> {
        self.write_record(RecordType::Version, &FRAMING_VERSION)?;
        self.write_record(RecordType::Mode, &[mode as u8])?;
        self.write_record(RecordType::Via, via.as_bytes())?;
        match encoding {
            PreambleEncoding::Known(known) => {
                self.write_record(RecordType::KnownEncoding, &[known as u8])
            }
            PreambleEncoding::Extensible(content_type) => {
                self.write_record(RecordType::ExtensibleEncoding, content_type.as_bytes())
            }
        }
    }

    pub fn write_preamble_end(&mut self) -> Result<()> {
        self.write_record(RecordType::PreambleEnd, &[])
    }

    pub fn write_envelope(&mut self, message: &[u8]) -> Result<()> {
        self.write_record(RecordType::SizedEnvelope, message)
    }

    pub fn write_end(&mut self) -> Result<()> {
        self.write_record(RecordType::End, &[])
    }

    pub fn into_inner(self) -> W {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::reader::FrameReader;

    fn written(writer: FrameWriter<Vec<u8>>) -> FrameReader<Cursor<Vec<u8>>> {
        FrameReader::new(Cursor::new(writer.into_inner()))
    }

    #[test]
    fn preamble_then_envelopes_then_end() {
        let mut writer = FrameWriter::new(Vec::new());
        writer
            .write_preamble(
                FramingMode::Duplex,
                "net.tcp://host/svc",
                PreambleEncoding::Known(KnownEncoding::Soap12BinarySession),
            )
            .unwrap();
        writer.write_envelope(b"one").unwrap();
        writer.write_envelope(b"two").unwrap();
        writer.write_end().unwrap();

        let mut reader = written(writer);
        let version = reader.read_frame().unwrap();
        assert_eq!(version.record, RecordType::Version);
        assert_eq!(version.payload.as_ref(), &FRAMING_VERSION);
        let mode = reader.read_frame().unwrap();
        assert_eq!(mode.payload.as_ref(), &[FramingMode::Duplex as u8]);

        assert_eq!(reader.read_envelope().unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(reader.via(), Some("net.tcp://host/svc"));
        assert_eq!(reader.content_type(), Some("application/soap+msbinsession1"));
        assert_eq!(reader.read_envelope().unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(reader.read_envelope().unwrap(), None);
    }

    #[test]
    fn compressed_content_types_use_an_extensible_record() {
        let encoding = PreambleEncoding::for_content_type("application/soap+msbin1+deflate");
        assert_eq!(
            encoding,
            PreambleEncoding::Extensible("application/soap+msbin1+deflate")
        );

        let mut writer = FrameWriter::new(Vec::new());
        writer
            .write_preamble(FramingMode::Simplex, "test://host/queue", encoding)
            .unwrap();
        writer.write_preamble_end().unwrap();
        writer.write_envelope(b"packed").unwrap();

        let mut reader = written(writer);
        assert_eq!(reader.read_envelope().unwrap().as_deref(), Some(&b"packed"[..]));
        assert_eq!(reader.content_type(), Some("application/soap+msbin1+deflate"));
    }

    #[test]
    fn oversized_envelope_writes_nothing() {
        let mut writer = FrameWriter::with_max_payload(Vec::new(), 8);
        let err = writer.write_envelope(b"nine bytes").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { max: 8, .. }));
        assert!(writer.into_inner().is_empty());
    }

    #[test]
    fn fixed_records_ignore_the_payload_limit() {
        let mut writer = FrameWriter::with_max_payload(Vec::new(), 0);
        writer.write_record(RecordType::Version, &FRAMING_VERSION).unwrap();
        writer.write_record(RecordType::PreambleAck, &[]).unwrap();
        assert_eq!(writer.into_inner(), vec![0x00, 1, 0, 0x0B]);
    }

    #[test]
    fn every_record_is_flushed() {
        let mut writer = FrameWriter::new(CountingSink::default());
        writer.write_envelope(b"a").unwrap();
        writer.write_end().unwrap();

        let sink = writer.into_inner();
        assert_eq!(sink.flushes, 2);
        assert_eq!(sink.data, vec![0x06, 1, b'a', 0x07]);
    }

    #[test]
    fn zero_length_write_is_a_closed_connection() {
        let mut writer = FrameWriter::new(Closed);
        assert!(matches!(
            writer.write_end(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn records_cross_a_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.write_record(RecordType::Fault, b"busy").unwrap();
        let fault = reader.read_frame().unwrap();
        assert_eq!(fault.record, RecordType::Fault);
        assert_eq!(fault.payload.as_ref(), b"busy");
    }

    #[derive(Default)]
    struct CountingSink {
        data: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
