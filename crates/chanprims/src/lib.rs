//! Composable channel stacks and binary message encoding.
//!
//! chanprims composes an ordered list of binding elements into channel
//! factories, and moves messages through them with a pooled, quota-bounded
//! binary encoder.
//!
//! # Crate Structure
//!
//! - [`frame`]: varint coding, framing records and the buffer pool
//! - [`message`]: messages, the binary XML encoder and its factories
//! - [`channel`]: lifecycle, timeouts, queues, ordering and request/reply correlation
//! - [`binding`]: binding elements, the composition context and the loopback transport
//!
//! ```
//! use chanprims::binding::{
//!     Binding, BindingElementCollection, BindingParameterCollection,
//!     BinaryMessageEncodingBindingElement, LoopbackTransportBindingElement, RequestChannelKind,
//! };
//! use chanprims::channel::{ChannelFactory, ChannelShape};
//!
//! let mut elements = BindingElementCollection::new();
//! elements.push(BinaryMessageEncodingBindingElement::new());
//! elements.push(LoopbackTransportBindingElement::new());
//! let binding = Binding::new("echo", elements);
//!
//! let factory = binding
//!     .build_channel_factory::<RequestChannelKind>(BindingParameterCollection::new())
//!     .unwrap();
//! assert_eq!(factory.inner().shape(), ChannelShape::Request);
//! ```

/// Re-export frame types.
pub mod frame {
    pub use chanprims_frame::*;
}

/// Re-export message types.
pub mod message {
    pub use chanprims_message::*;
}

/// Re-export channel types.
pub mod channel {
    pub use chanprims_channel::*;
}

/// Re-export binding types.
pub mod binding {
    pub use chanprims_binding::*;
}
