//! Channel factories and the tracking of the channels they create.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanprims_frame::BufferManager;
use chanprims_message::{MessageEncoderFactory, MessageVersion};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::channel::{
    Channel, ChannelClosed, ChannelHandle, ChannelId, ChannelShape, ClosedNotifier,
};
use crate::error::{ChannelError, Result, TimeoutPhase};
use crate::state::{CommunicationObject, CommunicationState};
use crate::timeout::TimeoutHelper;

/// Produces channels of one shape.
#[async_trait]
pub trait ChannelFactory: Send + Sync + fmt::Debug {
    fn shape(&self) -> ChannelShape;

    fn state(&self) -> CommunicationState;

    async fn open(&self, timeout: Duration) -> Result<()>;

    /// Close every channel created so far, then the factory itself.
    async fn close(&self, timeout: Duration) -> Result<()>;

    fn abort(&self);

    /// Create a channel to `address`, physically sent to `via` when given.
    fn create_channel(&self, address: &str, via: Option<&str>) -> Result<ChannelHandle>;

    /// A typed property exposed by this factory or the layers below it.
    fn property(&self, _type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Typed lookup over [`ChannelFactory::property`].
pub fn factory_property<T: Any + Send + Sync>(factory: &dyn ChannelFactory) -> Option<Arc<T>> {
    factory
        .property(TypeId::of::<T>())
        .and_then(|value| value.downcast::<T>().ok())
}

/// The set of live channels owned by a factory.
///
/// Channels report their own close with a [`ChannelClosed`] message; the
/// tracker applies those on every query, and also drops any channel it finds
/// already `Closed`. Removal is idempotent.
pub struct ChannelTracker {
    channels: Mutex<HashMap<ChannelId, Arc<dyn Channel>>>,
    tx: mpsc::UnboundedSender<ChannelClosed>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelClosed>>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            channels: Mutex::new(HashMap::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// A notifier for a channel about to be created with identity `id`.
    pub fn notifier(&self, id: ChannelId) -> ClosedNotifier {
        ClosedNotifier::new(id, self.tx.clone())
    }

    pub fn add(&self, channel: Arc<dyn Channel>) {
        let id = channel.id();
        self.channels.lock().insert(id, channel);
        tracing::trace!(channel = %id, "tracking channel");
    }

    /// Stop tracking `id`. Returns false if it was already gone.
    pub fn remove(&self, id: ChannelId) -> bool {
        let removed = self.channels.lock().remove(&id).is_some();
        if removed {
            tracing::trace!(channel = %id, "channel untracked");
        }
        removed
    }

    /// Number of channels still open.
    pub fn busy_count(&self) -> usize {
        self.apply_pending();
        self.channels.lock().len()
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Channel>> {
        self.apply_pending();
        self.channels.lock().values().cloned().collect()
    }

    /// Close tracked channels one at a time, each with what is left of the
    /// budget. Once the budget is spent the rest are aborted.
    pub async fn close_all(&self, timeout: Duration) -> Result<()> {
        let helper = TimeoutHelper::new(timeout);
        for channel in self.snapshot() {
            let remaining = helper.remaining();
            if remaining.is_zero() {
                tracing::debug!(channel = %channel.id(), "close budget spent, aborting channel");
                channel.abort();
                continue;
            }
            match tokio::time::timeout(remaining, channel.close(remaining)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        channel = %channel.id(),
                        error = %err,
                        "channel close failed, aborting"
                    );
                    channel.abort();
                }
                Err(_) => {
                    tracing::warn!(channel = %channel.id(), "channel close timed out, aborting");
                    channel.abort();
                }
            }
        }

        if self.wait_idle(helper.remaining()).await {
            return Ok(());
        }
        self.abort_all();
        Err(ChannelError::timeout(
            TimeoutPhase::Close,
            helper.original_timeout(),
        ))
    }

    /// Abort every tracked channel without waiting.
    pub fn abort_all(&self) {
        let channels: Vec<_> = self.channels.lock().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.abort();
        }
    }

    /// Wait until no tracked channel is left open.
    async fn wait_idle(&self, timeout: Duration) -> bool {
        let helper = TimeoutHelper::new(timeout);
        loop {
            if self.busy_count() == 0 {
                return true;
            }
            let mut rx = self.rx.lock().await;
            match tokio::time::timeout(helper.remaining(), rx.recv()).await {
                Ok(Some(ChannelClosed(id))) => {
                    self.remove(id);
                }
                // the tracker holds a sender, so the stream never ends
                Ok(None) => return self.busy_count() == 0,
                Err(_) => {
                    drop(rx);
                    return self.busy_count() == 0;
                }
            }
        }
    }

    fn apply_pending(&self) {
        if let Ok(mut rx) = self.rx.try_lock() {
            while let Ok(ChannelClosed(id)) = rx.try_recv() {
                self.remove(id);
            }
        }
        self.channels
            .lock()
            .retain(|_, channel| channel.state() != CommunicationState::Closed);
    }
}

impl Default for ChannelTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTracker")
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}

/// Lifecycle and channel tracking shared by every factory.
#[derive(Debug)]
pub struct ChannelFactoryBase {
    state: CommunicationObject,
    channels: ChannelTracker,
}

impl ChannelFactoryBase {
    pub fn new(name: &'static str) -> Self {
        Self {
            state: CommunicationObject::new(name),
            channels: ChannelTracker::new(),
        }
    }

    pub fn communication(&self) -> &CommunicationObject {
        &self.state
    }

    pub fn state(&self) -> CommunicationState {
        self.state.state()
    }

    pub fn open(&self) -> Result<()> {
        self.state.open()
    }

    /// Fail unless channels may be created now.
    pub fn ensure_can_create(&self) -> Result<()> {
        self.state.ensure_opened()
    }

    pub fn notifier(&self, id: ChannelId) -> ClosedNotifier {
        self.channels.notifier(id)
    }

    /// Track a newly created channel so close and abort reach it.
    pub fn track(&self, channel: Arc<dyn Channel>) {
        self.channels.add(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.busy_count()
    }

    pub fn channels(&self) -> &ChannelTracker {
        &self.channels
    }

    /// Close all channels within `timeout`, then move to `Closed`.
    ///
    /// Any failure aborts the factory before it is returned.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        match self.state.begin_close() {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => {
                self.abort();
                return Err(err);
            }
        }
        if let Err(err) = self.channels.close_all(timeout).await {
            tracing::warn!(factory = self.state.name(), error = %err, "close failed, aborting");
            self.abort();
            return Err(err);
        }
        self.state.complete_close();
        Ok(())
    }

    /// Abort the factory and every tracked channel. Idempotent.
    pub fn abort(&self) {
        self.state.abort();
        self.channels.abort_all();
    }
}

/// What a transport needs from the stack above it.
pub trait TransportFactorySettings {
    fn buffer_manager(&self) -> &Arc<BufferManager>;

    fn max_received_message_size(&self) -> usize;

    fn message_encoder_factory(&self) -> &Arc<dyn MessageEncoderFactory>;

    fn message_version(&self) -> MessageVersion;

    fn manual_addressing(&self) -> bool;
}

/// Transport configuration resolved while building a channel factory.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub buffer_manager: Arc<BufferManager>,
    pub max_received_message_size: usize,
    pub encoder_factory: Arc<dyn MessageEncoderFactory>,
    pub manual_addressing: bool,
}

impl TransportFactorySettings for TransportSettings {
    fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    fn max_received_message_size(&self) -> usize {
        self.max_received_message_size
    }

    fn message_encoder_factory(&self) -> &Arc<dyn MessageEncoderFactory> {
        &self.encoder_factory
    }

    fn message_version(&self) -> MessageVersion {
        self.encoder_factory.message_version()
    }

    fn manual_addressing(&self) -> bool {
        self.manual_addressing
    }
}

/// A factory base bound to one URI scheme and its transport settings.
#[derive(Debug)]
pub struct TransportChannelFactory {
    base: ChannelFactoryBase,
    scheme: String,
    settings: TransportSettings,
}

impl TransportChannelFactory {
    pub fn new(name: &'static str, scheme: impl Into<String>, settings: TransportSettings) -> Self {
        Self {
            base: ChannelFactoryBase::new(name),
            scheme: scheme.into(),
            settings,
        }
    }

    pub fn base(&self) -> &ChannelFactoryBase {
        &self.base
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Fail unless `via` is an absolute URI with this factory's scheme.
    pub fn validate_via(&self, via: &str) -> Result<()> {
        let uri = Url::parse(via).map_err(|err| {
            ChannelError::argument("via", format!("'{via}' is not an absolute URI: {err}"))
        })?;
        let scheme = uri.scheme();
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return Err(ChannelError::argument(
                "via",
                format!(
                    "the URI scheme '{scheme}' is invalid; expected '{}'",
                    self.scheme
                ),
            ));
        }
        Ok(())
    }

    /// Close the base, then release pooled buffers.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let result = self.base.close(timeout).await;
        self.settings.buffer_manager.clear();
        result
    }

    pub fn abort(&self) {
        self.base.abort();
        self.settings.buffer_manager.clear();
    }
}

impl TransportFactorySettings for TransportChannelFactory {
    fn buffer_manager(&self) -> &Arc<BufferManager> {
        self.settings.buffer_manager()
    }

    fn max_received_message_size(&self) -> usize {
        self.settings.max_received_message_size()
    }

    fn message_encoder_factory(&self) -> &Arc<dyn MessageEncoderFactory> {
        self.settings.message_encoder_factory()
    }

    fn message_version(&self) -> MessageVersion {
        self.settings.message_version()
    }

    fn manual_addressing(&self) -> bool {
        self.settings.manual_addressing()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chanprims_message::{BinaryEncoderSettings, BinaryMessageEncoderFactory};

    use super::*;
    use crate::queue::InputQueueChannel;

    const LONG: Duration = Duration::from_secs(5);

    /// A channel whose close takes a fixed time and counts aborts.
    struct SlowChannel {
        id: ChannelId,
        state: CommunicationObject,
        delay: Duration,
        aborts: Arc<AtomicUsize>,
        notifier: ClosedNotifier,
    }

    impl SlowChannel {
        fn tracked(
            base: &ChannelFactoryBase,
            delay: Duration,
            aborts: &Arc<AtomicUsize>,
        ) -> Arc<Self> {
            let id = ChannelId::next();
            let channel = Arc::new(Self {
                id,
                state: CommunicationObject::new("slow channel"),
                delay,
                aborts: Arc::clone(aborts),
                notifier: base.notifier(id),
            });
            channel.state.open().unwrap();
            base.track(channel.clone());
            channel
        }
    }

    #[async_trait]
    impl Channel for SlowChannel {
        fn id(&self) -> ChannelId {
            self.id
        }

        fn state(&self) -> CommunicationState {
            self.state.state()
        }

        async fn open(&self, _timeout: Duration) -> Result<()> {
            self.state.open()
        }

        async fn close(&self, _timeout: Duration) -> Result<()> {
            self.state.begin_close()?;
            tokio::time::sleep(self.delay).await;
            self.state.complete_close();
            self.notifier.notify();
            Ok(())
        }

        fn abort(&self) {
            if self.state.abort() {
                self.aborts.fetch_add(1, Ordering::SeqCst);
                self.notifier.notify();
            }
        }
    }

    fn settings() -> TransportSettings {
        TransportSettings {
            buffer_manager: Arc::new(BufferManager::new(64 * 1024, 16 * 1024).unwrap()),
            max_received_message_size: 64 * 1024,
            encoder_factory: Arc::new(
                BinaryMessageEncoderFactory::new(BinaryEncoderSettings::default()).unwrap(),
            ),
            manual_addressing: false,
        }
    }

    #[test]
    fn create_requires_opened() {
        let base = ChannelFactoryBase::new("test factory");
        assert!(matches!(
            base.ensure_can_create(),
            Err(ChannelError::InvalidState { .. })
        ));
        base.open().unwrap();
        base.ensure_can_create().unwrap();
    }

    #[tokio::test]
    async fn close_closes_tracked_channels() {
        let base = ChannelFactoryBase::new("test factory");
        base.open().unwrap();
        let channels: Vec<_> = (0..3)
            .map(|_| {
                let id = ChannelId::next();
                let channel = Arc::new(
                    InputQueueChannel::<u32>::new().with_closed_notifier(base.notifier(id)),
                );
                base.track(channel.clone());
                channel
            })
            .collect();
        for channel in &channels {
            channel.open(LONG).await.unwrap();
        }
        assert_eq!(base.channel_count(), 3);

        base.close(LONG).await.unwrap();
        assert_eq!(base.state(), CommunicationState::Closed);
        assert_eq!(base.channel_count(), 0);
        for channel in &channels {
            assert_eq!(channel.state(), CommunicationState::Closed);
        }
        assert!(base.ensure_can_create().is_err());
    }

    #[tokio::test]
    async fn self_closed_channels_are_untracked() {
        let base = ChannelFactoryBase::new("test factory");
        base.open().unwrap();
        let aborts = Arc::new(AtomicUsize::new(0));
        let channel = SlowChannel::tracked(&base, Duration::ZERO, &aborts);
        assert_eq!(base.channel_count(), 1);

        channel.close(LONG).await.unwrap();
        assert_eq!(base.channel_count(), 0);
        assert!(!base.channels().remove(channel.id()), "removal is idempotent");
    }

    #[tokio::test]
    async fn close_apportions_budget_then_aborts() {
        let base = ChannelFactoryBase::new("test factory");
        base.open().unwrap();
        let aborts = Arc::new(AtomicUsize::new(0));
        let channels: Vec<_> = (0..4)
            .map(|_| SlowChannel::tracked(&base, Duration::from_millis(80), &aborts))
            .collect();

        let started = std::time::Instant::now();
        base.close(Duration::from_millis(120)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let closed_gracefully = 4 - aborts.load(Ordering::SeqCst);
        assert!(closed_gracefully >= 1, "the first close fits the budget");
        assert!(aborts.load(Ordering::SeqCst) >= 2, "later closes degrade to abort");
        for channel in &channels {
            assert_eq!(channel.state(), CommunicationState::Closed);
        }
        assert_eq!(base.state(), CommunicationState::Closed);
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let base = ChannelFactoryBase::new("test factory");
        base.open().unwrap();
        let aborts = Arc::new(AtomicUsize::new(0));
        SlowChannel::tracked(&base, Duration::from_secs(60), &aborts);
        SlowChannel::tracked(&base, Duration::from_secs(60), &aborts);

        base.abort();
        base.abort();
        assert_eq!(aborts.load(Ordering::SeqCst), 2);
        assert_eq!(base.state(), CommunicationState::Closed);
        assert_eq!(base.channel_count(), 0);
    }

    #[test]
    fn validate_via_checks_scheme() {
        let factory = TransportChannelFactory::new("test factory", "test", settings());
        factory.validate_via("test://localhost/echo").unwrap();
        factory.validate_via("TEST://localhost/echo").unwrap();
        assert!(matches!(
            factory.validate_via("http://localhost/echo"),
            Err(ChannelError::Argument { name: "via", .. })
        ));
        assert!(factory.validate_via("not a uri").is_err());
    }

    #[test]
    fn via_without_an_authority_is_accepted() {
        let factory = TransportChannelFactory::new("test factory", "test", settings());
        factory.validate_via("test:echo").unwrap();
        factory.validate_via("test:/queue/orders").unwrap();
    }

    #[test]
    fn malformed_via_never_yields_a_scheme() {
        let factory = TransportChannelFactory::new("test factory", "test", settings());
        let err = factory.validate_via("http:/x://test").unwrap_err();
        let ChannelError::Argument { name, reason } = &err else {
            panic!("expected an argument error, got {err}");
        };
        assert_eq!(*name, "via");
        assert!(reason.contains("'http'"), "{reason}");
        assert!(matches!(
            factory.validate_via("://test"),
            Err(ChannelError::Argument { name: "via", .. })
        ));
        assert!(matches!(
            factory.validate_via("1test://host"),
            Err(ChannelError::Argument { name: "via", .. })
        ));
    }

    #[tokio::test]
    async fn transport_close_clears_buffers() {
        let factory = TransportChannelFactory::new("test factory", "test", settings());
        factory.base().open().unwrap();
        let buffers = factory.buffer_manager();
        let buffer = buffers.take_buffer(1000);
        buffers.return_buffer(buffer);
        assert_eq!(buffers.pooled_count(), 1);

        factory.close(LONG).await.unwrap();
        assert_eq!(factory.buffer_manager().pooled_count(), 0);
        assert_eq!(factory.message_version(), MessageVersion::Soap12WSAddressing10);
        assert_eq!(factory.max_received_message_size(), 64 * 1024);
    }
}
