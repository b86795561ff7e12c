//! The binding element contract.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use chanprims_channel::{ChannelFactory, ChannelShape};
use chanprims_message::{MessageEncoderFactory, MessageVersion};

use crate::context::BindingContext;
use crate::error::Result;
use crate::parameters::BindingParameterCollection;

/// One configurable layer of a channel stack.
///
/// Elements are consumed front to back. Each one builds the factory for the
/// layers below it through the context, then wraps or returns it. The
/// default methods simply delegate inward, so a pass-through element only
/// needs `name`, `clone_element` and `as_any`.
pub trait BindingElement: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// A deep copy, so stacks built from one binding never share state.
    fn clone_element(&self) -> Box<dyn BindingElement>;

    fn build_channel_factory(
        &self,
        context: &mut BindingContext,
        shape: ChannelShape,
    ) -> Result<Arc<dyn ChannelFactory>> {
        context.build_inner_channel_factory(shape)
    }

    fn can_build_channel_factory(&self, context: &BindingContext, shape: ChannelShape) -> bool {
        context.can_build_inner_channel_factory(shape)
    }

    /// A typed property of this element or of the elements below it.
    fn property(
        &self,
        context: &BindingContext,
        type_id: TypeId,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        context.inner_property(type_id)
    }

    /// Present only on elements that terminate a stack.
    fn as_transport(&self) -> Option<&dyn TransportBindingElement> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn BindingElement> {
    fn clone(&self) -> Self {
        self.clone_element()
    }
}

/// The innermost element: talks to the network.
pub trait TransportBindingElement: BindingElement {
    /// URI scheme every `via` must use.
    fn scheme(&self) -> &str;

    fn max_buffer_pool_size(&self) -> i64;

    fn max_received_message_size(&self) -> i64;

    /// When set, channels leave the `To` header to the caller.
    fn manual_addressing(&self) -> bool;
}

/// An element that selects the message encoder for the stack.
pub trait MessageEncodingBindingElement: BindingElement {
    fn message_version(&self) -> MessageVersion;

    fn create_message_encoder_factory(&self) -> Result<Arc<dyn MessageEncoderFactory>>;
}

/// Publish `element` to the transport below it.
pub fn add_message_encoding(
    parameters: &mut BindingParameterCollection,
    element: Arc<dyn MessageEncodingBindingElement>,
) {
    parameters.insert(element);
}

/// The encoding element published by a layer above, if any.
pub fn find_message_encoding(
    parameters: &BindingParameterCollection,
) -> Option<Arc<dyn MessageEncodingBindingElement>> {
    parameters
        .get::<Arc<dyn MessageEncodingBindingElement>>()
        .map(|element| Arc::clone(&*element))
}
