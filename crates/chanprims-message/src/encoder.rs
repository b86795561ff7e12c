//! The message encoder contract and buffered stream reads.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use chanprims_frame::BufferManager;

use crate::content_type;
use crate::error::{MessageError, Result};
use crate::message::Message;
use crate::version::MessageVersion;

/// Initial chunk used when buffering a stream of unknown length.
pub const INITIAL_STREAM_BUFFER_SIZE: usize = 4096;

/// Encoded message bytes inside a buffer taken from a [`BufferManager`].
///
/// The bytes occupy `buffer[offset..offset + len]`; the space before
/// `offset` is left for the transport's own framing.
#[derive(Debug)]
pub struct PooledMessageBytes {
    buffer: Vec<u8>,
    offset: usize,
    len: usize,
}

impl PooledMessageBytes {
    pub fn new(buffer: Vec<u8>, offset: usize, len: usize) -> Result<Self> {
        if offset.checked_add(len).is_none_or(|end| end > buffer.len()) {
            return Err(MessageError::invalid_argument(
                "len",
                format!(
                    "range {offset}+{len} exceeds buffer of {} bytes",
                    buffer.len()
                ),
            ));
        }
        Ok(Self {
            buffer,
            offset,
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// The reserved prefix before the message bytes.
    pub fn prefix_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.offset]
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hand the underlying buffer back to `manager`.
    pub fn release(self, manager: &BufferManager) {
        manager.return_buffer(self.buffer);
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Reads and writes messages in one wire format.
pub trait MessageEncoder: Send + Sync + fmt::Debug {
    fn content_type(&self) -> &str;

    fn media_type(&self) -> &str;

    fn message_version(&self) -> MessageVersion;

    fn is_charset_supported(&self, _charset: &str) -> bool {
        false
    }

    fn is_content_type_supported(&self, content_type: &str) -> bool {
        content_type::is_content_type_supported(
            content_type,
            self.content_type(),
            self.media_type(),
            |charset| self.is_charset_supported(charset),
        )
    }

    /// Decode a message from pooled bytes; the buffer goes back to
    /// `buffer_manager` once decoded. Neither the bytes nor their inflated
    /// form may exceed `max_message_size`.
    fn read_message(
        &self,
        bytes: PooledMessageBytes,
        max_message_size: usize,
        buffer_manager: &BufferManager,
        content_type: Option<&str>,
    ) -> Result<Message>;

    /// Buffer a message from `reader`, at most `max_message_size` bytes, and decode it.
    fn read_message_from(
        &self,
        reader: &mut dyn Read,
        max_message_size: usize,
        content_type: Option<&str>,
    ) -> Result<Message>;

    /// Encode into a pooled buffer, leaving `offset` bytes free in front.
    fn write_message(
        &self,
        message: &mut Message,
        max_message_size: usize,
        buffer_manager: &BufferManager,
        offset: usize,
    ) -> Result<PooledMessageBytes>;

    fn write_message_to(&self, message: &mut Message, writer: &mut dyn Write) -> Result<()>;
}

/// Produces encoders, including per-session encoders with their own state.
pub trait MessageEncoderFactory: Send + Sync + fmt::Debug {
    /// The shared, stateless encoder.
    fn encoder(&self) -> Arc<dyn MessageEncoder>;

    fn message_version(&self) -> MessageVersion;

    /// An encoder for one session. Stateless formats return the shared one.
    fn create_session_encoder(&self) -> Arc<dyn MessageEncoder> {
        self.encoder()
    }
}

/// Fail with `VersionMismatch` unless `message` uses `expected`.
pub fn ensure_message_version(message: &Message, expected: MessageVersion) -> Result<()> {
    if message.version() != expected {
        return Err(MessageError::VersionMismatch {
            expected,
            actual: message.version(),
        });
    }
    Ok(())
}

/// Fail with `UnsupportedContentType` when a content type is given and not understood.
pub fn ensure_content_type(encoder: &dyn MessageEncoder, content_type: Option<&str>) -> Result<()> {
    match content_type {
        Some(ct) if !encoder.is_content_type_supported(ct) => {
            Err(MessageError::UnsupportedContentType(ct.to_owned()))
        }
        _ => Ok(()),
    }
}

/// Buffer that grows by doubling, using pooled buffers, up to a hard cap.
struct StreamBuffer<'a> {
    manager: &'a BufferManager,
    buffer: Vec<u8>,
    count: usize,
    max_size: usize,
}

impl<'a> StreamBuffer<'a> {
    fn new(manager: &'a BufferManager, initial_size: usize, max_size: usize) -> Self {
        Self {
            manager,
            buffer: manager.take_buffer(initial_size.min(max_size)),
            count: 0,
            max_size,
        }
    }

    fn limit(&self) -> usize {
        self.buffer.len().min(self.max_size)
    }

    /// Make room for more bytes. Returns false once the cap is reached.
    fn reserve(&mut self) -> bool {
        let limit = self.limit();
        if self.count < limit {
            return true;
        }
        if limit >= self.max_size {
            return false;
        }
        let grown_size = limit.saturating_mul(2).clamp(limit + 1, self.max_size);
        let mut grown = self.manager.take_buffer(grown_size);
        grown[..self.count].copy_from_slice(&self.buffer[..self.count]);
        let old = std::mem::replace(&mut self.buffer, grown);
        self.manager.return_buffer(old);
        tracing::trace!(size = grown_size, "stream buffer grown");
        true
    }

    fn spare(&mut self) -> &mut [u8] {
        let limit = self.limit();
        &mut self.buffer[self.count..limit]
    }

    fn advance(&mut self, n: usize) {
        self.count += n;
    }

    fn overflow(self) -> MessageError {
        self.manager.return_buffer(self.buffer);
        tracing::debug!(max = self.max_size, "stream exceeded maximum message size");
        MessageError::SizeExceeded { max: self.max_size }
    }

    fn finish(self) -> PooledMessageBytes {
        PooledMessageBytes {
            buffer: self.buffer,
            offset: 0,
            len: self.count,
        }
    }
}

fn read_retrying<R: Read + ?Sized>(reader: &mut R, dst: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(dst) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Read `reader` to the end into a pooled buffer.
///
/// The buffer starts at `initial_size` and doubles when full. Reading more
/// than `max_size` bytes fails with `SizeExceeded`.
pub fn buffer_message_stream<R: Read + ?Sized>(
    reader: &mut R,
    buffer_manager: &BufferManager,
    initial_size: usize,
    max_size: usize,
) -> Result<PooledMessageBytes> {
    let mut buffer = StreamBuffer::new(buffer_manager, initial_size, max_size);
    loop {
        if !buffer.reserve() {
            let mut peek = [0u8; 1];
            if read_retrying(reader, &mut peek)? == 0 {
                break;
            }
            return Err(buffer.overflow());
        }
        let n = read_retrying(reader, buffer.spare())?;
        if n == 0 {
            break;
        }
        buffer.advance(n);
    }
    Ok(buffer.finish())
}

/// Async form of [`buffer_message_stream`].
#[cfg(feature = "async")]
pub async fn buffer_message_stream_async<R>(
    reader: &mut R,
    buffer_manager: &BufferManager,
    initial_size: usize,
    max_size: usize,
) -> Result<PooledMessageBytes>
where
    R: tokio::io::AsyncRead + Unpin + ?Sized,
{
    use tokio::io::AsyncReadExt;

    let mut buffer = StreamBuffer::new(buffer_manager, initial_size, max_size);
    loop {
        if !buffer.reserve() {
            let mut peek = [0u8; 1];
            if reader.read(&mut peek).await? == 0 {
                break;
            }
            return Err(buffer.overflow());
        }
        let n = reader.read(buffer.spare()).await?;
        if n == 0 {
            break;
        }
        buffer.advance(n);
    }
    Ok(buffer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::TextBodyWriter;

    /// Hands out at most `chunk` bytes per read, with an interruption first.
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
        interrupted: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn trickle(data: &[u8]) -> Trickle<'_> {
        Trickle {
            data,
            chunk: 7,
            interrupted: false,
        }
    }

    #[test]
    fn buffers_whole_stream_with_growth() {
        let manager = BufferManager::new(64 * 1024, 16 * 1024).unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let bytes = buffer_message_stream(&mut trickle(&data), &manager, 128, 64 * 1024).unwrap();
        assert_eq!(bytes.as_slice(), data.as_slice());
        // Outgrown buffers went back to the pool.
        assert!(manager.pooled_count() > 0);
    }

    #[test]
    fn exactly_max_size_is_accepted() {
        let manager = BufferManager::unpooled();
        let data = vec![7u8; 1000];
        let bytes = buffer_message_stream(&mut trickle(&data), &manager, 10, 1000).unwrap();
        assert_eq!(bytes.len(), 1000);
    }

    #[test]
    fn over_max_size_fails() {
        let manager = BufferManager::unpooled();
        let data = vec![7u8; 1001];
        let err = buffer_message_stream(&mut trickle(&data), &manager, 10, 1000).unwrap_err();
        assert!(matches!(err, MessageError::SizeExceeded { max: 1000 }));
    }

    #[test]
    fn empty_stream() {
        let manager = BufferManager::unpooled();
        let bytes = buffer_message_stream(&mut io::empty(), &manager, 0, 0).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn pooled_bytes_range_checked() {
        assert!(PooledMessageBytes::new(vec![0; 8], 4, 4).is_ok());
        assert!(PooledMessageBytes::new(vec![0; 8], 4, 5).is_err());
        assert!(PooledMessageBytes::new(vec![0; 8], usize::MAX, 2).is_err());
    }

    #[test]
    fn version_mismatch_detected() {
        let message = Message::with_body_writer(
            MessageVersion::Soap11,
            "urn:a",
            TextBodyWriter::new("a", "", "b"),
        );
        assert!(ensure_message_version(&message, MessageVersion::Soap11).is_ok());
        assert!(matches!(
            ensure_message_version(&message, MessageVersion::Soap12WSAddressing10),
            Err(MessageError::VersionMismatch { .. })
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn async_buffering_matches_sync() {
        let manager = BufferManager::new(64 * 1024, 16 * 1024).unwrap();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = data.as_slice();
        let bytes = buffer_message_stream_async(&mut reader, &manager, 64, 4096)
            .await
            .unwrap();
        assert_eq!(bytes.as_slice(), data.as_slice());

        let mut reader = data.as_slice();
        let err = buffer_message_stream_async(&mut reader, &manager, 64, 2048)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageError::SizeExceeded { max: 2048 }));
    }
}
