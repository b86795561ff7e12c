//! Varint-prefixed record framing and pooled buffers.
//!
//! This is the lowest layer of chanprims. Every encoded message travels as a
//! framing record:
//! - A 1-byte record type
//! - For sized records, a base-128 varint payload length
//! - The payload
//!
//! The [`BufferManager`] here is shared by encoders and transports to reuse
//! message buffers under a bounded byte budget.

pub mod codec;
pub mod error;
pub mod pool;
pub mod reader;
pub mod record;
pub mod varint;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
pub use error::{FrameError, Result};
pub use pool::{BufferManager, DEFAULT_MAX_BUFFER_POOL_SIZE};
pub use reader::FrameReader;
pub use record::{FramingMode, KnownEncoding, RecordLayout, RecordType};
pub use varint::{decode_varint, encoded_size, VarintDecoder, MAX_VARINT};
pub use writer::{FrameWriter, PreambleEncoding, FRAMING_VERSION};
