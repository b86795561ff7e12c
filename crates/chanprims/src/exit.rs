use std::fmt;
use std::io;

use chanprims_binding::BindingError;
use chanprims_channel::{error::message_kind, ChannelError, ErrorKind};
use chanprims_frame::FrameError;
use chanprims_message::MessageError;

// Exit codes follow the sysexits conventions where one applies.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG_INVALID: i32 = 78;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn kind_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Configuration => CONFIG_INVALID,
        ErrorKind::Argument => USAGE,
        ErrorKind::Quota | ErrorKind::Protocol => DATA_INVALID,
        ErrorKind::Timeout => TIMEOUT,
        ErrorKind::Lifecycle => FAILURE,
        ErrorKind::Io => INTERNAL,
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidArgument { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn message_error(context: &str, err: MessageError) -> CliError {
    match err {
        MessageError::Io(source) => io_error(context, source),
        MessageError::Frame(err) => frame_error(context, err),
        other => CliError::new(kind_code(message_kind(&other)), format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Message(err) => message_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        other => CliError::new(kind_code(other.kind()), format!("{context}: {other}")),
    }
}

pub fn binding_error(context: &str, err: BindingError) -> CliError {
    match err {
        BindingError::Channel(err) => channel_error(context, err),
        BindingError::Message(err) => message_error(context, err),
        other => CliError::new(kind_code(other.kind()), format!("{context}: {other}")),
    }
}
