//! Messages and binary message encoders for chanprims.
//!
//! A [`Message`] carries addressing headers, properties and a [`Body`]. A
//! [`MessageEncoder`] turns messages into bytes and back; the binary
//! encoders here write dictionary-tokenized binary XML, optionally
//! compressed and optionally with a per-session string dictionary.
//!
//! ```
//! use chanprims_frame::BufferManager;
//! use chanprims_message::{
//!     BinaryEncoderSettings, BinaryMessageEncoderFactory, Message, MessageEncoder,
//!     MessageEncoderFactory,
//!     MessageVersion, TextBodyWriter,
//! };
//!
//! let factory = BinaryMessageEncoderFactory::new(BinaryEncoderSettings::default()).unwrap();
//! let encoder = factory.encoder();
//! let buffers = BufferManager::new(64 * 1024, 16 * 1024).unwrap();
//!
//! let mut message = Message::with_body_writer(
//!     MessageVersion::Soap12WSAddressing10,
//!     "urn:example:echo",
//!     TextBodyWriter::new("echo", "urn:example", "hello"),
//! );
//! let bytes = encoder.write_message(&mut message, 64 * 1024, &buffers, 0).unwrap();
//! let mut decoded = encoder.read_message(bytes, 64 * 1024, &buffers, None).unwrap();
//! assert_eq!(decoded.read_body_text().unwrap(), "hello");
//! ```

pub mod binary;
pub mod binary_xml;
pub mod body;
pub mod content_type;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod infoset;
pub mod message;
mod pool;
pub mod version;

pub use binary::{
    BinaryEncoderSettings, BinaryMessageEncoder, BinaryMessageEncoderFactory, CompressionFormat,
    BINARY_CONTENT_TYPE, BINARY_SESSION_CONTENT_TYPE,
};
pub use body::{Body, BodyWriter, EmptyBodyWriter, InfosetBodyWriter, TextBodyWriter};
pub use content_type::{is_content_type_supported, ContentType};
#[cfg(feature = "async")]
pub use encoder::buffer_message_stream_async;
pub use encoder::{
    buffer_message_stream, ensure_message_version, MessageEncoder, MessageEncoderFactory,
    PooledMessageBytes,
};
pub use error::{MessageError, Result};
pub use infoset::{InfosetBuffer, InfosetWriter, ReaderQuotas, XmlNode};
pub use message::{
    Message, MessageBuffer, MessageHeader, MessageHeaders, MessageProperties, MessageState,
    UniqueId,
};
pub use version::{AddressingVersion, EnvelopeVersion, MessageVersion};
