use chanprims_channel::{error::message_kind, ChannelError, ChannelShape, ErrorKind};
use chanprims_message::MessageError;

/// Errors raised while composing a binding into a channel factory.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// The element list ran out before a transport terminated the stack.
    #[error("no binding element is left to build a {shape} channel factory")]
    NoChannelBuilder { shape: ChannelShape },

    /// Elements were left over after the build finished.
    #[error("binding elements were not consumed while building: {}", remaining.join(", "))]
    ElementsNotConsumed { remaining: Vec<String> },

    /// The binding violates a structural rule.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

impl BindingError {
    pub fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BindingError::NoChannelBuilder { .. }
            | BindingError::ElementsNotConsumed { .. }
            | BindingError::InvalidBinding(_) => ErrorKind::Configuration,
            BindingError::Argument { .. } => ErrorKind::Argument,
            BindingError::Channel(err) => err.kind(),
            BindingError::Message(err) => message_kind(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, BindingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_failures_are_configuration_errors() {
        let err = BindingError::NoChannelBuilder {
            shape: ChannelShape::Request,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("request"));

        let err = BindingError::ElementsNotConsumed {
            remaining: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().ends_with("a, b"));
    }

    #[test]
    fn wrapped_errors_keep_their_kind() {
        let err = BindingError::from(ChannelError::ObjectDisposed("factory"));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);

        let err = BindingError::from(MessageError::SizeExceeded { max: 16 });
        assert_eq!(err.kind(), ErrorKind::Quota);

        assert_eq!(BindingError::argument("x", "bad").kind(), ErrorKind::Argument);
    }
}
