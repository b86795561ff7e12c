use std::fmt;
use std::time::Duration;

use chanprims_frame::FrameError;
use chanprims_message::MessageError;

use crate::state::CommunicationState;

/// The phase of a composed operation that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Open,
    Send,
    Receive,
    ReceiveReply,
    Close,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutPhase::Open => "open",
            TimeoutPhase::Send => "send",
            TimeoutPhase::Receive => "receive",
            TimeoutPhase::ReceiveReply => "receive reply",
            TimeoutPhase::Close => "close",
        })
    }
}

/// Coarse failure taxonomy shared by the channel and binding layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A misconfigured stack, actionable at deploy time.
    Configuration,
    Argument,
    Quota,
    Timeout,
    Protocol,
    /// Operating on an object in the wrong lifecycle state.
    Lifecycle,
    Io,
}

/// Errors raised by channels and channel factories.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The object is not in a state that permits the operation.
    #[error("{object} is in state {state}; the operation requires {required}")]
    InvalidState {
        object: &'static str,
        state: CommunicationState,
        required: CommunicationState,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A caller supplied an argument outside its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },

    /// An operation did not complete within its budget.
    #[error("the {phase} phase timed out after {timeout:?}")]
    Timeout {
        phase: TimeoutPhase,
        timeout: Duration,
    },

    /// The object faulted; the reason is carried to later callers.
    #[error("{object} faulted: {reason}")]
    Faulted { object: &'static str, reason: String },

    /// The object was aborted while the operation was pending.
    #[error("{0} was aborted")]
    Aborted(&'static str),

    /// The object is closed.
    #[error("{0} is closed")]
    ObjectDisposed(&'static str),

    #[error("quota `{quota}` exceeded (limit {limit})")]
    QuotaExceeded { quota: &'static str, limit: usize },

    /// Message construction or encoding failed.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Framing failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl ChannelError {
    pub fn timeout(phase: TimeoutPhase, timeout: Duration) -> Self {
        Self::Timeout { phase, timeout }
    }

    pub fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    pub fn faulted(object: &'static str, reason: impl Into<String>) -> Self {
        Self::Faulted {
            object,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::InvalidState { .. }
            | ChannelError::Faulted { .. }
            | ChannelError::Aborted(_)
            | ChannelError::ObjectDisposed(_) => ErrorKind::Lifecycle,
            ChannelError::InvalidOperation(_) => ErrorKind::Configuration,
            ChannelError::Argument { .. } => ErrorKind::Argument,
            ChannelError::Timeout { .. } => ErrorKind::Timeout,
            ChannelError::QuotaExceeded { .. } => ErrorKind::Quota,
            ChannelError::Message(err) => message_kind(err),
            ChannelError::Frame(err) => frame_kind(err),
        }
    }
}

/// Map a message-layer error onto the shared taxonomy.
pub fn message_kind(err: &MessageError) -> ErrorKind {
    match err {
        MessageError::InvalidOperation(_) => ErrorKind::Lifecycle,
        MessageError::InvalidArgument { .. } => ErrorKind::Argument,
        MessageError::QuotaExceeded { .. } | MessageError::SizeExceeded { .. } => {
            ErrorKind::Quota
        }
        MessageError::VersionMismatch { .. }
        | MessageError::Protocol(_)
        | MessageError::UnsupportedContentType(_) => ErrorKind::Protocol,
        MessageError::Frame(err) => frame_kind(err),
        MessageError::Io(_) => ErrorKind::Io,
    }
}

fn frame_kind(err: &FrameError) -> ErrorKind {
    match err {
        FrameError::InvalidArgument { .. } => ErrorKind::Argument,
        FrameError::PayloadTooLarge { .. } => ErrorKind::Quota,
        FrameError::Io(_) | FrameError::ConnectionClosed => ErrorKind::Io,
        _ => ErrorKind::Protocol,
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_names_its_phase() {
        let err = ChannelError::timeout(TimeoutPhase::ReceiveReply, Duration::from_millis(250));
        let text = err.to_string();
        assert!(text.contains("receive reply"), "{text}");
        assert!(text.contains("250ms"), "{text}");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn message_errors_keep_their_kind() {
        let err: ChannelError = MessageError::QuotaExceeded {
            quota: "max_depth",
            limit: 32,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Quota);

        let err: ChannelError = MessageError::Protocol("bad record".into()).into();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
