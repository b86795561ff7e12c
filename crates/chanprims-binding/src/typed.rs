//! Channel factories typed by the kind of channel they produce.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chanprims_channel::{
    factory_property, ChannelError, ChannelFactory, ChannelHandle, ChannelShape,
    CommunicationState, MessageReceiver, MessageSender, RequestSender,
};

use crate::binding::BindingTimeouts;

/// A channel shape together with the trait its channels implement.
pub trait ChannelKind: Send + Sync + 'static {
    const SHAPE: ChannelShape;

    type Channel: ?Sized + Send + Sync;

    fn from_handle(handle: ChannelHandle) -> Option<Arc<Self::Channel>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RequestChannelKind;

impl ChannelKind for RequestChannelKind {
    const SHAPE: ChannelShape = ChannelShape::Request;
    type Channel = dyn RequestSender;

    fn from_handle(handle: ChannelHandle) -> Option<Arc<Self::Channel>> {
        handle.into_request()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OutputChannelKind;

impl ChannelKind for OutputChannelKind {
    const SHAPE: ChannelShape = ChannelShape::Output;
    type Channel = dyn MessageSender;

    fn from_handle(handle: ChannelHandle) -> Option<Arc<Self::Channel>> {
        handle.into_output()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputChannelKind;

impl ChannelKind for InputChannelKind {
    const SHAPE: ChannelShape = ChannelShape::Input;
    type Channel = dyn MessageReceiver;

    fn from_handle(handle: ChannelHandle) -> Option<Arc<Self::Channel>> {
        handle.into_input()
    }
}

/// A built channel factory that hands out channels of kind `K`.
pub struct TypedChannelFactory<K: ChannelKind> {
    inner: Arc<dyn ChannelFactory>,
    timeouts: BindingTimeouts,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ChannelKind> TypedChannelFactory<K> {
    pub(crate) fn new(inner: Arc<dyn ChannelFactory>, timeouts: BindingTimeouts) -> Self {
        Self {
            inner,
            timeouts,
            _kind: PhantomData,
        }
    }

    pub fn inner(&self) -> &Arc<dyn ChannelFactory> {
        &self.inner
    }

    /// Budgets configured on the binding this factory came from.
    pub fn timeouts(&self) -> &BindingTimeouts {
        &self.timeouts
    }

    pub fn state(&self) -> CommunicationState {
        self.inner.state()
    }

    pub async fn open(&self, timeout: Duration) -> chanprims_channel::Result<()> {
        self.inner.open(timeout).await
    }

    pub async fn close(&self, timeout: Duration) -> chanprims_channel::Result<()> {
        self.inner.close(timeout).await
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn create_channel(&self, address: &str) -> chanprims_channel::Result<Arc<K::Channel>> {
        self.create_channel_via(address, None)
    }

    pub fn create_channel_via(
        &self,
        address: &str,
        via: Option<&str>,
    ) -> chanprims_channel::Result<Arc<K::Channel>> {
        let handle = self.inner.create_channel(address, via)?;
        let shape = handle.shape();
        K::from_handle(handle).ok_or_else(|| {
            ChannelError::InvalidOperation(format!(
                "the factory produced a {shape} channel; expected {}",
                K::SHAPE
            ))
        })
    }

    pub fn get_property<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        factory_property::<T>(self.inner.as_ref())
    }
}

impl<K: ChannelKind> Clone for TypedChannelFactory<K> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.inner), self.timeouts)
    }
}

impl<K: ChannelKind> fmt::Debug for TypedChannelFactory<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedChannelFactory")
            .field("shape", &K::SHAPE)
            .field("inner", &self.inner)
            .finish()
    }
}
