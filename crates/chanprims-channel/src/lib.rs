//! Channel lifecycle and runtime primitives for chanprims.
//!
//! Every channel and factory carries a [`CommunicationObject`] state
//! machine. Factories track the channels they create and close them within
//! one apportioned time budget. Input channels sit on an [`InputQueue`],
//! optionally behind a [`DeliveryStrategy`] that restores sequence order.
//! Request channels correlate replies to requests by message id.

pub mod channel;
pub mod correlator;
pub mod delivery;
pub mod error;
pub mod factory;
pub mod queue;
pub mod request;
pub mod sequence;
pub mod state;
pub mod timeout;

pub use channel::{
    Channel, ChannelClosed, ChannelHandle, ChannelId, ChannelShape, ClosedNotifier,
    MessageReceiver, MessageSender, RequestSender,
};
pub use correlator::RequestReplyCorrelator;
pub use delivery::{
    DeliveryStrategy, OrderedDeliveryStrategy, SequencedReceiver, UnorderedDeliveryStrategy,
};
pub use error::{ChannelError, ErrorKind, Result, TimeoutPhase};
pub use factory::{
    factory_property, ChannelFactory, ChannelFactoryBase, ChannelTracker,
    TransportChannelFactory, TransportFactorySettings, TransportSettings,
};
pub use queue::{DequeuedCallback, InputQueue, InputQueueChannel};
pub use request::{PendingRequest, RequestChannel, RequestTransport};
pub use sequence::SequenceRange;
pub use state::{CommunicationObject, CommunicationState};
pub use timeout::TimeoutHelper;
