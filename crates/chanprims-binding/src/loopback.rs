//! An in-process transport.
//!
//! Every message crosses a real encode/decode through the configured
//! encoder and pooled buffers, so a loopback stack exercises the same wire
//! path a network transport would. Requests are answered by a
//! [`ReplyHandler`]; one-way sends are delivered to input channels
//! listening on the same [`LoopbackNetwork`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanprims_channel::{
    Channel, ChannelError, ChannelFactory, ChannelHandle, ChannelId, ChannelShape,
    ClosedNotifier, CommunicationObject, CommunicationState, InputQueueChannel, MessageSender,
    RequestChannel, RequestReplyCorrelator, RequestTransport, TimeoutHelper, TimeoutPhase,
    TransportChannelFactory, TransportFactorySettings, TransportSettings,
};
use chanprims_frame::BufferManager;
use chanprims_message::{
    BinaryEncoderSettings, BinaryMessageEncoderFactory, Body, Message, MessageEncoder,
    MessageEncoderFactory, MessageProperties, MessageVersion,
};
use parking_lot::Mutex;

use crate::context::BindingContext;
use crate::element::{find_message_encoding, BindingElement, TransportBindingElement};
use crate::error::{BindingError, Result};
use crate::protection::ChannelProtectionRequirements;

pub const LOOPBACK_SCHEME: &str = "test";

pub const DEFAULT_MAX_BUFFER_POOL_SIZE: i64 = 512 * 1024;

pub const DEFAULT_MAX_RECEIVED_MESSAGE_SIZE: i64 = 64 * 1024;

/// Produces the reply to a loopback request.
pub trait ReplyHandler: Send + Sync + fmt::Debug {
    fn reply(&self, request: Message) -> chanprims_channel::Result<Message>;
}

/// Replies with the request body under `<action>Response`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoReplyHandler;

impl ReplyHandler for EchoReplyHandler {
    fn reply(&self, mut request: Message) -> chanprims_channel::Result<Message> {
        let body = request.read_body()?;
        let action = format!(
            "{}Response",
            request.headers().action.as_deref().unwrap_or_default()
        );
        Ok(Message::new(request.version(), action, Body::buffered(body)))
    }
}

/// Input channels listening on loopback addresses.
///
/// Clones share the same listeners.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    listeners: Arc<Mutex<HashMap<String, Arc<InputQueueChannel<Message>>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` as the listener for `address`.
    pub fn listen(
        &self,
        address: &str,
        channel: Arc<InputQueueChannel<Message>>,
    ) -> chanprims_channel::Result<()> {
        let mut listeners = self.listeners.lock();
        Self::prune(&mut listeners);
        if listeners.contains_key(address) {
            return Err(ChannelError::InvalidOperation(format!(
                "an input channel is already listening on '{address}'"
            )));
        }
        listeners.insert(address.to_owned(), channel);
        tracing::debug!(address, "loopback listener registered");
        Ok(())
    }

    /// Hand `message` to the listener for `address`.
    pub fn deliver(&self, address: &str, message: Message) -> chanprims_channel::Result<()> {
        let listener = self.listeners.lock().get(address).cloned();
        let Some(listener) = listener else {
            return Err(ChannelError::InvalidOperation(format!(
                "no input channel is listening on '{address}'"
            )));
        };
        if !listener.enqueue_and_dispatch(message, None, true) {
            return Err(ChannelError::ObjectDisposed("loopback listener"));
        }
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        Self::prune(&mut listeners);
        listeners.len()
    }

    fn prune(listeners: &mut HashMap<String, Arc<InputQueueChannel<Message>>>) {
        listeners.retain(|_, channel| !channel.state().is_terminal());
    }
}

impl fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Terminates a stack with the loopback transport.
#[derive(Debug, Clone)]
pub struct LoopbackTransportBindingElement {
    scheme: String,
    max_buffer_pool_size: i64,
    max_received_message_size: i64,
    manual_addressing: bool,
    handler: Arc<dyn ReplyHandler>,
    network: LoopbackNetwork,
}

impl Default for LoopbackTransportBindingElement {
    fn default() -> Self {
        Self {
            scheme: LOOPBACK_SCHEME.to_owned(),
            max_buffer_pool_size: DEFAULT_MAX_BUFFER_POOL_SIZE,
            max_received_message_size: DEFAULT_MAX_RECEIVED_MESSAGE_SIZE,
            manual_addressing: false,
            handler: Arc::new(EchoReplyHandler),
            network: LoopbackNetwork::new(),
        }
    }
}

impl LoopbackTransportBindingElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    pub fn set_max_buffer_pool_size(&mut self, value: i64) -> Result<()> {
        if value < 0 {
            return Err(BindingError::argument(
                "max_buffer_pool_size",
                format!("must be non-negative, got {value}"),
            ));
        }
        self.max_buffer_pool_size = value;
        Ok(())
    }

    pub fn set_max_received_message_size(&mut self, value: i64) -> Result<()> {
        if value <= 0 {
            return Err(BindingError::argument(
                "max_received_message_size",
                format!("must be positive, got {value}"),
            ));
        }
        self.max_received_message_size = value;
        Ok(())
    }

    pub fn set_manual_addressing(&mut self, manual_addressing: bool) {
        self.manual_addressing = manual_addressing;
    }

    pub fn with_reply_handler(mut self, handler: impl ReplyHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Join `network` instead of a private one.
    pub fn with_network(mut self, network: LoopbackNetwork) -> Self {
        self.network = network;
        self
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    fn settings(&self, context: &BindingContext) -> Result<TransportSettings> {
        let encoder_factory = match find_message_encoding(context.binding_parameters()) {
            Some(encoding) => encoding.create_message_encoder_factory()?,
            None => default_encoder_factory()?,
        };
        let max_buffer_size = i32::try_from(self.max_received_message_size).unwrap_or(i32::MAX);
        let buffer_manager = BufferManager::new(self.max_buffer_pool_size, max_buffer_size)
            .map_err(ChannelError::from)?;
        Ok(TransportSettings {
            buffer_manager: Arc::new(buffer_manager),
            max_received_message_size: usize::try_from(self.max_received_message_size)
                .unwrap_or(usize::MAX),
            encoder_factory,
            manual_addressing: self.manual_addressing,
        })
    }

    fn message_version(&self, context: &BindingContext) -> MessageVersion {
        find_message_encoding(context.binding_parameters())
            .map(|encoding| encoding.message_version())
            .unwrap_or_default()
    }
}

fn default_encoder_factory() -> Result<Arc<dyn MessageEncoderFactory>> {
    Ok(Arc::new(BinaryMessageEncoderFactory::new(
        BinaryEncoderSettings::default(),
    )?))
}

impl BindingElement for LoopbackTransportBindingElement {
    fn name(&self) -> &str {
        "loopback transport"
    }

    fn clone_element(&self) -> Box<dyn BindingElement> {
        Box::new(self.clone())
    }

    fn build_channel_factory(
        &self,
        context: &mut BindingContext,
        shape: ChannelShape,
    ) -> Result<Arc<dyn ChannelFactory>> {
        let settings = self.settings(context)?;
        tracing::debug!(
            binding = context.binding().name(),
            scheme = %self.scheme,
            %shape,
            content_type = settings.encoder_factory.encoder().content_type(),
            "loopback channel factory built"
        );
        let transport =
            TransportChannelFactory::new("loopback channel factory", self.scheme.clone(), settings);
        Ok(Arc::new(LoopbackChannelFactory::new(
            shape,
            transport,
            Arc::clone(&self.handler),
            self.network.clone(),
        )))
    }

    fn can_build_channel_factory(&self, _context: &BindingContext, _shape: ChannelShape) -> bool {
        true
    }

    fn property(
        &self,
        context: &BindingContext,
        type_id: TypeId,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        if type_id == TypeId::of::<MessageVersion>() {
            return Some(Arc::new(self.message_version(context)));
        }
        if type_id == TypeId::of::<ChannelProtectionRequirements>() {
            let requirements = context
                .binding_parameters()
                .get::<ChannelProtectionRequirements>()
                .unwrap_or_default();
            return Some(requirements);
        }
        None
    }

    fn as_transport(&self) -> Option<&dyn TransportBindingElement> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl TransportBindingElement for LoopbackTransportBindingElement {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn max_buffer_pool_size(&self) -> i64 {
        self.max_buffer_pool_size
    }

    fn max_received_message_size(&self) -> i64 {
        self.max_received_message_size
    }

    fn manual_addressing(&self) -> bool {
        self.manual_addressing
    }
}

/// The encode/decode path every loopback message takes.
#[derive(Clone)]
struct Wire {
    encoder: Arc<dyn MessageEncoder>,
    buffers: Arc<BufferManager>,
    max_message_size: usize,
}

impl Wire {
    fn transmit(&self, message: &mut Message) -> chanprims_channel::Result<Message> {
        let bytes = self
            .encoder
            .write_message(message, self.max_message_size, &self.buffers, 0)?;
        let size = bytes.len();
        let mut received = self.encoder.read_message(
            bytes,
            self.max_message_size,
            &self.buffers,
            Some(self.encoder.content_type()),
        )?;
        received.properties_mut().via = message.properties().via.clone();
        tracing::trace!(size, action = ?received.headers().action, "loopback transmit");
        Ok(received)
    }
}

struct LoopbackRequestTransport {
    wire: Wire,
    handler: Arc<dyn ReplyHandler>,
}

#[async_trait]
impl RequestTransport for LoopbackRequestTransport {
    async fn send_request(
        &self,
        mut request: Message,
        _timeout: Duration,
    ) -> chanprims_channel::Result<Option<Message>> {
        let received = self.wire.transmit(&mut request)?;
        let addressing = Message::from_parts(
            received.version(),
            received.headers().clone(),
            MessageProperties::default(),
            Body::empty(),
        );
        let mut reply = self.handler.reply(received)?;
        RequestReplyCorrelator::prepare_reply(&mut reply, &addressing);
        self.wire.transmit(&mut reply).map(Some)
    }
}

struct LoopbackOutputChannel {
    id: ChannelId,
    state: CommunicationObject,
    remote_address: String,
    via: String,
    manual_addressing: bool,
    wire: Wire,
    network: LoopbackNetwork,
    notifier: ClosedNotifier,
}

#[async_trait]
impl Channel for LoopbackOutputChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> CommunicationState {
        self.state.state()
    }

    async fn open(&self, _timeout: Duration) -> chanprims_channel::Result<()> {
        self.state.open()
    }

    async fn close(&self, _timeout: Duration) -> chanprims_channel::Result<()> {
        match self.state.begin_close() {
            Ok(true) => {
                self.state.complete_close();
                self.notifier.notify();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    fn abort(&self) {
        if self.state.abort() {
            self.notifier.notify();
        }
    }
}

#[async_trait]
impl MessageSender for LoopbackOutputChannel {
    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    async fn send(&self, mut message: Message, timeout: Duration) -> chanprims_channel::Result<()> {
        self.state.ensure_opened()?;
        let helper = TimeoutHelper::new(timeout);
        helper
            .run(TimeoutPhase::Send, async {
                if !self.manual_addressing {
                    message.headers_mut().to = Some(self.remote_address.clone());
                }
                message.properties_mut().via = Some(self.via.clone());
                let received = self.wire.transmit(&mut message)?;
                self.network.deliver(&self.via, received)
            })
            .await
    }
}

/// Channel factory of the loopback transport.
pub struct LoopbackChannelFactory {
    shape: ChannelShape,
    transport: TransportChannelFactory,
    handler: Arc<dyn ReplyHandler>,
    network: LoopbackNetwork,
}

impl LoopbackChannelFactory {
    pub fn new(
        shape: ChannelShape,
        transport: TransportChannelFactory,
        handler: Arc<dyn ReplyHandler>,
        network: LoopbackNetwork,
    ) -> Self {
        Self {
            shape,
            transport,
            handler,
            network,
        }
    }

    pub fn transport(&self) -> &TransportChannelFactory {
        &self.transport
    }

    pub fn network(&self) -> &LoopbackNetwork {
        &self.network
    }

    fn wire(&self) -> Wire {
        Wire {
            encoder: self.transport.message_encoder_factory().encoder(),
            buffers: Arc::clone(self.transport.buffer_manager()),
            max_message_size: self.transport.max_received_message_size(),
        }
    }
}

impl fmt::Debug for LoopbackChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackChannelFactory")
            .field("shape", &self.shape)
            .field("scheme", &self.transport.scheme())
            .field("state", &self.transport.base().state())
            .field("handler", &self.handler)
            .finish()
    }
}

#[async_trait]
impl ChannelFactory for LoopbackChannelFactory {
    fn shape(&self) -> ChannelShape {
        self.shape
    }

    fn state(&self) -> CommunicationState {
        self.transport.base().state()
    }

    async fn open(&self, _timeout: Duration) -> chanprims_channel::Result<()> {
        self.transport.base().open()
    }

    async fn close(&self, timeout: Duration) -> chanprims_channel::Result<()> {
        self.transport.close(timeout).await
    }

    fn abort(&self) {
        self.transport.abort();
    }

    fn create_channel(
        &self,
        address: &str,
        via: Option<&str>,
    ) -> chanprims_channel::Result<ChannelHandle> {
        let base = self.transport.base();
        base.ensure_can_create()?;
        let via = via.unwrap_or(address);
        self.transport.validate_via(via)?;

        let id = ChannelId::next();
        let notifier = base.notifier(id);
        let handle = match self.shape {
            ChannelShape::Request => {
                let transport = Arc::new(LoopbackRequestTransport {
                    wire: self.wire(),
                    handler: Arc::clone(&self.handler),
                });
                let channel = Arc::new(
                    RequestChannel::new(transport, address, via)
                        .with_manual_addressing(self.transport.manual_addressing())
                        .with_closed_notifier(notifier),
                );
                base.track(channel.clone());
                ChannelHandle::Request(channel)
            }
            ChannelShape::Output => {
                let channel = Arc::new(LoopbackOutputChannel {
                    id,
                    state: CommunicationObject::new("loopback output channel"),
                    remote_address: address.to_owned(),
                    via: via.to_owned(),
                    manual_addressing: self.transport.manual_addressing(),
                    wire: self.wire(),
                    network: self.network.clone(),
                    notifier,
                });
                base.track(channel.clone());
                ChannelHandle::Output(channel)
            }
            ChannelShape::Input => {
                let channel =
                    Arc::new(InputQueueChannel::<Message>::new().with_closed_notifier(notifier));
                self.network.listen(via, Arc::clone(&channel))?;
                base.track(channel.clone());
                ChannelHandle::Input(channel)
            }
        };
        tracing::debug!(
            channel = %id,
            shape = %self.shape,
            address,
            via,
            "loopback channel created"
        );
        Ok(handle)
    }

    fn property(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        if type_id == TypeId::of::<MessageVersion>() {
            return Some(Arc::new(self.transport.message_version()));
        }
        if type_id == TypeId::of::<BufferManager>() {
            let buffers: Arc<dyn Any + Send + Sync> = self.transport.buffer_manager().clone();
            return Some(buffers);
        }
        if type_id == TypeId::of::<LoopbackNetwork>() {
            return Some(Arc::new(self.network.clone()));
        }
        None
    }
}
