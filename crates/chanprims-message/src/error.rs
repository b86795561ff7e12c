use crate::version::MessageVersion;

/// Errors raised while building, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The operation is not valid in the object's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A caller supplied an argument outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A reader or writer quota was exceeded.
    #[error("quota `{quota}` exceeded (limit {limit})")]
    QuotaExceeded { quota: &'static str, limit: usize },

    /// A buffered read grew past its maximum size.
    #[error("message size exceeded the maximum of {max} bytes")]
    SizeExceeded { max: usize },

    /// The message version does not match the encoder's fixed version.
    #[error("message version {actual} does not match encoder version {expected}")]
    VersionMismatch {
        expected: MessageVersion,
        actual: MessageVersion,
    },

    /// Malformed framing or binary XML content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Content type not understood by the encoder.
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] chanprims_frame::FrameError),

    /// An I/O error occurred while reading or writing a stream.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MessageError {
    pub(crate) fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol(detail.into())
    }

    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MessageError>;
