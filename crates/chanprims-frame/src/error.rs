/// Errors that can occur during framing, varint coding, or buffer management.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A caller supplied an argument outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A varint needs more than five groups, or a value is outside the 31-bit domain.
    #[error("varint value exceeds the 31-bit encodable range")]
    VarintOverflow,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The stream contains a record type this codec does not know.
    #[error("unknown framing record type 0x{0:02X}")]
    UnknownRecord(u8),

    /// A fixed-size record was given a payload of the wrong length.
    #[error("record {record} expects {expected} payload bytes, got {actual}")]
    InvalidRecordLength {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
