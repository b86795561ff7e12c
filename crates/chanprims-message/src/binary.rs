//! Binary message encoders.
//!
//! Messages are written as binary XML records. Session encoders prefix each
//! message with the dictionary strings it introduces, so later messages on
//! the same session can refer to them by id. Compressed variants wrap the
//! whole payload in gzip or deflate.
//!
//! Session payload layout:
//! ```text
//! ┌──────────────────────┬──────────────────────────────┬──────────────┐
//! │ block size (varint)  │ (len varint, UTF-8 string)*  │ XML records  │
//! └──────────────────────┴──────────────────────────────┴──────────────┘
//! ```

use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use chanprims_frame::{decode_varint, encoded_size, BufferManager, KnownEncoding};
use flate2::Compression;
use parking_lot::Mutex;

use crate::binary_xml::{BinaryXmlReader, BinaryXmlWriter};
use crate::dictionary::SessionDictionary;
use crate::encoder::{
    buffer_message_stream, ensure_content_type, ensure_message_version, MessageEncoder,
    MessageEncoderFactory, PooledMessageBytes, INITIAL_STREAM_BUFFER_SIZE,
};
use crate::error::{MessageError, Result};
use crate::infoset::{InfosetWriter, ReaderQuotas};
use crate::message::Message;
use crate::pool::SynchronizedPool;
use crate::version::{EnvelopeVersion, MessageVersion};

pub const BINARY_CONTENT_TYPE: &str = "application/soap+msbin1";
pub const BINARY_SESSION_CONTENT_TYPE: &str = "application/soap+msbinsession1";

/// Writer scratch buffers above this capacity are not kept in the pool.
const MAX_RETAINED_WRITER_BUFFER: usize = 64 * 1024;

/// Payload compression applied by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionFormat {
    #[default]
    None,
    GZip,
    Deflate,
}

impl CompressionFormat {
    /// Suffix appended to the content type.
    pub fn suffix(self) -> &'static str {
        match self {
            CompressionFormat::None => "",
            CompressionFormat::GZip => "+gzip",
            CompressionFormat::Deflate => "+deflate",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionFormat::None => "none",
            CompressionFormat::GZip => "gzip",
            CompressionFormat::Deflate => "deflate",
        })
    }
}

impl FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionFormat::None),
            "gzip" => Ok(CompressionFormat::GZip),
            "deflate" => Ok(CompressionFormat::Deflate),
            other => Err(format!("unknown compression format '{other}'")),
        }
    }
}

/// Configuration shared by every encoder a factory creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryEncoderSettings {
    /// Must use a SOAP 1.2 envelope.
    pub message_version: MessageVersion,
    /// Idle readers kept for reuse.
    pub max_read_pool_size: usize,
    /// Idle writers kept for reuse.
    pub max_write_pool_size: usize,
    /// Bytes of dictionary strings one session direction may introduce.
    pub max_session_size: usize,
    pub reader_quotas: ReaderQuotas,
    pub compression: CompressionFormat,
}

impl Default for BinaryEncoderSettings {
    fn default() -> Self {
        Self {
            message_version: MessageVersion::Soap12WSAddressing10,
            max_read_pool_size: 64,
            max_write_pool_size: 16,
            max_session_size: 2048,
            reader_quotas: ReaderQuotas::default(),
            compression: CompressionFormat::None,
        }
    }
}

impl BinaryEncoderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.message_version.envelope() != EnvelopeVersion::Soap12 {
            return Err(MessageError::invalid_argument(
                "message_version",
                format!("binary encoding requires SOAP 1.2, got {}", self.message_version),
            ));
        }
        if self.max_read_pool_size == 0 {
            return Err(MessageError::invalid_argument(
                "max_read_pool_size",
                "must be at least 1",
            ));
        }
        if self.max_write_pool_size == 0 {
            return Err(MessageError::invalid_argument(
                "max_write_pool_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

struct EncoderPools {
    readers: SynchronizedPool<BinaryXmlReader>,
    writers: SynchronizedPool<BinaryXmlWriter>,
}

struct SessionState {
    outgoing: SessionDictionary,
    incoming: SessionDictionary,
}

/// Creates the shared binary encoder and per-session encoders.
pub struct BinaryMessageEncoderFactory {
    settings: Arc<BinaryEncoderSettings>,
    pools: Arc<EncoderPools>,
    encoder: Arc<BinaryMessageEncoder>,
}

impl BinaryMessageEncoderFactory {
    pub fn new(settings: BinaryEncoderSettings) -> Result<Self> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let pools = Arc::new(EncoderPools {
            readers: SynchronizedPool::new(settings.max_read_pool_size),
            writers: SynchronizedPool::new(settings.max_write_pool_size),
        });
        let encoder = Arc::new(BinaryMessageEncoder::new(
            Arc::clone(&settings),
            Arc::clone(&pools),
            false,
        ));
        tracing::debug!(
            content_type = encoder.content_type(),
            max_read_pool_size = settings.max_read_pool_size,
            max_write_pool_size = settings.max_write_pool_size,
            "binary encoder factory created"
        );
        Ok(Self {
            settings,
            pools,
            encoder,
        })
    }

    pub fn settings(&self) -> &BinaryEncoderSettings {
        &self.settings
    }

    /// A session encoder with its own dictionaries.
    pub fn session_encoder(&self) -> BinaryMessageEncoder {
        BinaryMessageEncoder::new(Arc::clone(&self.settings), Arc::clone(&self.pools), true)
    }
}

impl fmt::Debug for BinaryMessageEncoderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryMessageEncoderFactory")
            .field("settings", &self.settings)
            .finish()
    }
}

impl MessageEncoderFactory for BinaryMessageEncoderFactory {
    fn encoder(&self) -> Arc<dyn MessageEncoder> {
        self.encoder.clone()
    }

    fn message_version(&self) -> MessageVersion {
        self.settings.message_version
    }

    fn create_session_encoder(&self) -> Arc<dyn MessageEncoder> {
        Arc::new(self.session_encoder())
    }
}

/// Binary XML encoder, optionally session-aware and compressed.
pub struct BinaryMessageEncoder {
    settings: Arc<BinaryEncoderSettings>,
    pools: Arc<EncoderPools>,
    content_type: String,
    session: Option<Mutex<SessionState>>,
}

impl BinaryMessageEncoder {
    fn new(settings: Arc<BinaryEncoderSettings>, pools: Arc<EncoderPools>, session: bool) -> Self {
        let base = if session {
            BINARY_SESSION_CONTENT_TYPE
        } else {
            BINARY_CONTENT_TYPE
        };
        let content_type = format!("{base}{}", settings.compression.suffix());
        let session = session.then(|| {
            Mutex::new(SessionState {
                outgoing: SessionDictionary::new(settings.max_session_size),
                incoming: SessionDictionary::new(settings.max_session_size),
            })
        });
        Self {
            settings,
            pools,
            content_type,
            session,
        }
    }

    pub fn is_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn compression(&self) -> CompressionFormat {
        self.settings.compression
    }

    /// The framing `KnownEncoding` for this encoder, if it has one.
    pub fn known_encoding(&self) -> Option<KnownEncoding> {
        match (self.settings.compression, self.is_session()) {
            (CompressionFormat::None, false) => Some(KnownEncoding::Soap12Binary),
            (CompressionFormat::None, true) => Some(KnownEncoding::Soap12BinarySession),
            _ => None,
        }
    }

    fn encode(&self, message: &mut Message, max_message_size: usize) -> Result<Vec<u8>> {
        ensure_message_version(message, self.settings.message_version)?;
        let mut infoset = InfosetWriter::new();
        message.write_message(&mut infoset)?;
        let nodes = infoset.finish()?;

        let mut writer = self.pools.writers.take().unwrap_or_default();
        let result = match &self.session {
            None => writer
                .write(&nodes, None)
                .and_then(|records| self.finish_payload(records.to_vec(), max_message_size)),
            Some(session) => {
                let mut session = session.lock();
                let result = writer
                    .write(&nodes, Some(&mut session.outgoing))
                    .and_then(|records| {
                        let payload = session_payload(session.outgoing.pending(), records)?;
                        self.finish_payload(payload, max_message_size)
                    });
                match result {
                    Ok(_) => session.outgoing.commit_pending(),
                    Err(_) => session.outgoing.discard_pending(),
                }
                result
            }
        };
        writer.reset(MAX_RETAINED_WRITER_BUFFER);
        if !self.pools.writers.give(writer) {
            tracing::trace!("writer pool full, dropping writer");
        }
        result
    }

    fn finish_payload(&self, payload: Vec<u8>, max_message_size: usize) -> Result<Vec<u8>> {
        let payload = self.compress(payload)?;
        if payload.len() > max_message_size {
            return Err(MessageError::QuotaExceeded {
                quota: "max_message_size",
                limit: max_message_size,
            });
        }
        Ok(payload)
    }

    fn decode(&self, bytes: &[u8], max_message_size: usize) -> Result<Message> {
        let data = self.decompress(bytes, max_message_size)?;

        let mut reader = self
            .pools
            .readers
            .take()
            .unwrap_or_else(|| BinaryXmlReader::new(self.settings.reader_quotas));
        let result = match &self.session {
            None => reader.read(&data, None),
            Some(session) => {
                let mut session = session.lock();
                read_session_strings(&data, &mut session.incoming)
                    .and_then(|consumed| reader.read(&data[consumed..], Some(&session.incoming)))
            }
        };
        reader.reset();
        if !self.pools.readers.give(reader) {
            tracing::trace!("reader pool full, dropping reader");
        }

        let nodes = result?;
        let mut message = Message::from_infoset(self.settings.message_version, &nodes)?;
        message.properties_mut().encoder = Some(self.content_type.clone());
        Ok(message)
    }

    fn compress(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
        match self.settings.compression {
            CompressionFormat::None => Ok(payload),
            CompressionFormat::GZip => {
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&payload)?;
                Ok(encoder.finish()?)
            }
            CompressionFormat::Deflate => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&payload)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Inflate `bytes`, never past `max_message_size`.
    fn decompress<'b>(&self, bytes: &'b [u8], max_message_size: usize) -> Result<Cow<'b, [u8]>> {
        let too_large = MessageError::QuotaExceeded {
            quota: "max_message_size",
            limit: max_message_size,
        };
        if bytes.len() > max_message_size {
            return Err(too_large);
        }
        let mut decoder: Box<dyn Read + 'b> = match self.settings.compression {
            CompressionFormat::None => return Ok(Cow::Borrowed(bytes)),
            CompressionFormat::GZip => Box::new(flate2::read::GzDecoder::new(bytes)),
            CompressionFormat::Deflate => Box::new(flate2::read::DeflateDecoder::new(bytes)),
        };
        let initial = INITIAL_STREAM_BUFFER_SIZE
            .max(bytes.len().saturating_mul(2))
            .min(max_message_size);
        let inflated = buffer_message_stream(
            &mut decoder,
            &BufferManager::unpooled(),
            initial,
            max_message_size,
        )
        .map_err(|err| match err {
            MessageError::SizeExceeded { .. } => too_large,
            other => other,
        })?;
        let len = inflated.len();
        let mut buffer = inflated.into_buffer();
        buffer.truncate(len);
        Ok(Cow::Owned(buffer))
    }

    #[cfg(test)]
    fn pooled_writers(&self) -> usize {
        self.pools.writers.len()
    }
}

/// Prefix `records` with the block of newly announced strings.
fn session_payload<'s>(strings: impl Iterator<Item = &'s str>, records: &[u8]) -> Result<Vec<u8>> {
    let mut block = BytesMut::new();
    for s in strings {
        chanprims_frame::varint::encode(varint_len(s.len())?, &mut block)?;
        block.put_slice(s.as_bytes());
    }
    let mut payload = BytesMut::with_capacity(
        encoded_size(varint_len(block.len())?) + block.len() + records.len(),
    );
    chanprims_frame::varint::encode(varint_len(block.len())?, &mut payload)?;
    payload.put_slice(&block);
    payload.put_slice(records);
    Ok(payload.to_vec())
}

/// Add the announced strings to `dictionary`; returns bytes consumed.
///
/// On error, none of the block's strings are kept.
fn read_session_strings(data: &[u8], dictionary: &mut SessionDictionary) -> Result<usize> {
    let result = announce_session_strings(data, dictionary);
    match result {
        Ok(_) => dictionary.commit_pending(),
        Err(_) => dictionary.discard_pending(),
    }
    result
}

fn announce_session_strings(data: &[u8], dictionary: &mut SessionDictionary) -> Result<usize> {
    let (block_len, header) = decode_varint(data)?
        .ok_or_else(|| MessageError::protocol("truncated session string block"))?;
    let end = header + block_len as usize;
    let block = data
        .get(header..end)
        .ok_or_else(|| MessageError::protocol("session string block exceeds message"))?;

    let mut pos = 0usize;
    while pos < block.len() {
        let (len, consumed) = decode_varint(&block[pos..])?
            .ok_or_else(|| MessageError::protocol("truncated session string length"))?;
        pos += consumed;
        let bytes = block
            .get(pos..pos + len as usize)
            .ok_or_else(|| MessageError::protocol("session string exceeds block"))?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| MessageError::protocol(format!("invalid UTF-8 in session string: {e}")))?;
        dictionary.announce(value)?;
        pos += len as usize;
    }
    Ok(end)
}

fn varint_len(len: usize) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&v| v <= chanprims_frame::MAX_VARINT)
        .ok_or(MessageError::QuotaExceeded {
            quota: "max_session_size",
            limit: chanprims_frame::MAX_VARINT as usize,
        })
}

impl fmt::Debug for BinaryMessageEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryMessageEncoder")
            .field("content_type", &self.content_type)
            .field("session", &self.is_session())
            .finish()
    }
}

impl MessageEncoder for BinaryMessageEncoder {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn media_type(&self) -> &str {
        &self.content_type
    }

    fn message_version(&self) -> MessageVersion {
        self.settings.message_version
    }

    fn read_message(
        &self,
        bytes: PooledMessageBytes,
        max_message_size: usize,
        buffer_manager: &BufferManager,
        content_type: Option<&str>,
    ) -> Result<Message> {
        let result = ensure_content_type(self, content_type)
            .and_then(|()| self.decode(bytes.as_slice(), max_message_size));
        bytes.release(buffer_manager);
        result
    }

    fn read_message_from(
        &self,
        reader: &mut dyn Read,
        max_message_size: usize,
        content_type: Option<&str>,
    ) -> Result<Message> {
        ensure_content_type(self, content_type)?;
        let bytes = buffer_message_stream(
            reader,
            &BufferManager::unpooled(),
            INITIAL_STREAM_BUFFER_SIZE.min(max_message_size),
            max_message_size,
        )?;
        self.decode(bytes.as_slice(), max_message_size)
    }

    fn write_message(
        &self,
        message: &mut Message,
        max_message_size: usize,
        buffer_manager: &BufferManager,
        offset: usize,
    ) -> Result<PooledMessageBytes> {
        let payload = self.encode(message, max_message_size)?;
        let total = offset + payload.len();
        let mut buffer = buffer_manager.take_buffer(total);
        buffer[offset..total].copy_from_slice(&payload);
        tracing::trace!(len = payload.len(), offset, "message encoded");
        PooledMessageBytes::new(buffer, offset, payload.len())
    }

    fn write_message_to(&self, message: &mut Message, writer: &mut dyn Write) -> Result<()> {
        let payload = self.encode(message, usize::MAX)?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }
}
