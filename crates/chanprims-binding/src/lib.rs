//! Binding elements and channel stack composition for chanprims.
//!
//! A [`Binding`] is an ordered list of [`BindingElement`]s ending in exactly
//! one transport. Building walks the list front to back through a
//! [`BindingContext`]; each element builds the factory for the layers below
//! it and hands the result outward, so the outermost element returns the
//! finished [`ChannelFactory`](chanprims_channel::ChannelFactory).
//!
//! ```
//! use chanprims_binding::{
//!     Binding, BindingElementCollection, BindingParameterCollection,
//!     BinaryMessageEncodingBindingElement, LoopbackTransportBindingElement, RequestChannelKind,
//! };
//!
//! let mut elements = BindingElementCollection::new();
//! elements.push(BinaryMessageEncodingBindingElement::new());
//! elements.push(LoopbackTransportBindingElement::new());
//! let binding = Binding::new("loopback", elements);
//!
//! let factory = binding
//!     .build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new())
//!     .unwrap();
//! assert_eq!(binding.scheme(), Some("test"));
//! # drop(factory);
//! ```

pub mod binding;
pub mod context;
pub mod demux;
pub mod element;
pub mod encoding;
pub mod error;
pub mod loopback;
pub mod parameters;
pub mod protection;
pub mod typed;

pub use binding::{
    Binding, BindingDescription, BindingElementCollection, BindingTimeouts, DEFAULT_NAMESPACE,
};
pub use context::BindingContext;
pub use demux::ChannelDemuxerBindingElement;
pub use element::{
    add_message_encoding, find_message_encoding, BindingElement, MessageEncodingBindingElement,
    TransportBindingElement,
};
pub use encoding::BinaryMessageEncodingBindingElement;
pub use error::{BindingError, Result};
pub use loopback::{
    EchoReplyHandler, LoopbackChannelFactory, LoopbackNetwork, LoopbackTransportBindingElement,
    ReplyHandler, LOOPBACK_SCHEME,
};
pub use parameters::BindingParameterCollection;
pub use protection::{
    ChannelProtectionRequirements, MessageDirection, MessagePartSpecification, ProtectionKind,
};
pub use typed::{
    ChannelKind, InputChannelKind, OutputChannelKind, RequestChannelKind, TypedChannelFactory,
};
