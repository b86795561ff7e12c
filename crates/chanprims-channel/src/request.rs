//! Request channels: send a request, await the correlated reply.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanprims_message::{Message, MessageError, UniqueId};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use crate::channel::{Channel, ChannelId, ClosedNotifier, RequestSender};
use crate::correlator::RequestReplyCorrelator;
use crate::error::{ChannelError, Result, TimeoutPhase};
use crate::state::{CommunicationObject, CommunicationState};
use crate::timeout::TimeoutHelper;

const OBJECT: &str = "request channel";

/// Moves a prepared request to the remote side.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Send `request` within `timeout`.
    ///
    /// A transport that produces the reply in-line returns it; otherwise it
    /// returns `None` and the reply arrives later through
    /// [`RequestChannel::deliver_reply`].
    async fn send_request(&self, request: Message, timeout: Duration) -> Result<Option<Message>>;
}

type ReplySlot = oneshot::Sender<Result<Message>>;

/// An in-flight request awaiting its reply.
pub struct PendingRequest {
    id: UniqueId,
    reply: Mutex<Option<ReplySlot>>,
}

impl PendingRequest {
    fn new(id: UniqueId, reply: ReplySlot) -> Self {
        Self {
            id,
            reply: Mutex::new(Some(reply)),
        }
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    /// Complete with `outcome`. Only the first completion wins.
    fn complete(&self, outcome: Result<Message>) -> bool {
        match self.reply.lock().take() {
            Some(slot) => slot.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish()
    }
}

/// A request/reply channel over a [`RequestTransport`].
pub struct RequestChannel {
    id: ChannelId,
    state: CommunicationObject,
    remote_address: String,
    via: String,
    manual_addressing: bool,
    transport: Arc<dyn RequestTransport>,
    correlator: RequestReplyCorrelator,
    outstanding: Mutex<HashMap<UniqueId, Arc<PendingRequest>>>,
    drained: Notify,
    notifier: Option<ClosedNotifier>,
}

impl RequestChannel {
    pub fn new(
        transport: Arc<dyn RequestTransport>,
        remote_address: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self {
            id: ChannelId::next(),
            state: CommunicationObject::new(OBJECT),
            remote_address: remote_address.into(),
            via: via.into(),
            manual_addressing: false,
            transport,
            correlator: RequestReplyCorrelator::new(),
            outstanding: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            notifier: None,
        }
    }

    /// Leave the `To` header to the caller.
    pub fn with_manual_addressing(mut self, manual_addressing: bool) -> Self {
        self.manual_addressing = manual_addressing;
        self
    }

    /// Report close to the owner through `notifier`.
    pub fn with_closed_notifier(mut self, notifier: ClosedNotifier) -> Self {
        self.id = notifier.id();
        self.notifier = Some(notifier);
        self
    }

    pub fn communication(&self) -> &CommunicationObject {
        &self.state
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().len()
    }

    pub fn correlator(&self) -> &RequestReplyCorrelator {
        &self.correlator
    }

    /// Route `reply` to the request it relates to.
    ///
    /// Returns false when no pending request matches, which happens when
    /// the request already timed out or the channel was aborted.
    pub fn deliver_reply(&self, reply: Message) -> bool {
        match self.correlator.find::<Arc<PendingRequest>>(&reply, true) {
            Some(pending) => pending.complete(Ok(reply)),
            None => {
                tracing::debug!(
                    channel = %self.id,
                    relates_to = ?reply.headers().relates_to,
                    "dropping reply with no pending request"
                );
                false
            }
        }
    }

    /// Fault the channel; pending and later requests fail with the fault.
    pub fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.state.fault(reason.clone()) {
            return;
        }
        tracing::warn!(channel = %self.id, %reason, "request channel faulted");
        self.correlator.clear();
        for pending in self.drain_outstanding() {
            pending.complete(Err(ChannelError::faulted(OBJECT, reason.clone())));
        }
    }

    fn prepare(&self, message: &mut Message) -> UniqueId {
        let id = RequestReplyCorrelator::prepare_request(message);
        if !self.manual_addressing {
            message.headers_mut().to = Some(self.remote_address.clone());
        }
        message.properties_mut().via = Some(self.via.clone());
        id
    }

    fn register(
        &self,
        message: &Message,
        id: &UniqueId,
    ) -> Result<(Arc<PendingRequest>, oneshot::Receiver<Result<Message>>)> {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(PendingRequest::new(id.clone(), tx));
        // abort and fault drain under this lock, so the state is rechecked here
        let mut outstanding = self.outstanding.lock();
        self.state.ensure_opened()?;
        self.correlator.add(message, Arc::clone(&pending))?;
        outstanding.insert(id.clone(), Arc::clone(&pending));
        Ok((pending, rx))
    }

    fn unregister(&self, id: &UniqueId) {
        self.correlator.remove::<Arc<PendingRequest>>(id);
        let mut outstanding = self.outstanding.lock();
        outstanding.remove(id);
        if outstanding.is_empty() {
            self.drained.notify_waiters();
        }
    }

    fn drain_outstanding(&self) -> Vec<Arc<PendingRequest>> {
        let drained: Vec<_> = self.outstanding.lock().drain().map(|(_, p)| p).collect();
        self.drained.notify_waiters();
        drained
    }

    fn abort_outstanding(&self) {
        self.correlator.clear();
        for pending in self.drain_outstanding() {
            tracing::debug!(
                channel = %self.id,
                request = %pending.id(),
                "aborting pending request"
            );
            pending.complete(Err(ChannelError::Aborted(OBJECT)));
        }
    }

    async fn wait_for_outstanding(&self, timeout: Duration) -> bool {
        let helper = TimeoutHelper::new(timeout);
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.outstanding.lock().is_empty() {
                return true;
            }
            if tokio::time::timeout(helper.remaining(), drained).await.is_err() {
                return self.outstanding.lock().is_empty();
            }
        }
    }

    fn notify_closed(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }
}

struct Registration<'a> {
    channel: &'a RequestChannel,
    id: UniqueId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.channel.unregister(&self.id);
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("id", &self.id)
            .field("state", &self.state.state())
            .field("remote_address", &self.remote_address)
            .field("via", &self.via)
            .field("outstanding", &self.outstanding_count())
            .finish()
    }
}

#[async_trait]
impl Channel for RequestChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn state(&self) -> CommunicationState {
        self.state.state()
    }

    async fn open(&self, _timeout: Duration) -> Result<()> {
        self.state.open()
    }

    /// Wait for outstanding requests within `timeout`, then abort stragglers.
    async fn close(&self, timeout: Duration) -> Result<()> {
        match self.state.begin_close() {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => {
                self.abort();
                return Err(err);
            }
        }

        if !self.wait_for_outstanding(timeout).await {
            tracing::warn!(
                channel = %self.id,
                outstanding = self.outstanding_count(),
                "close timed out waiting for requests, aborting them"
            );
            self.abort_outstanding();
        }
        self.state.complete_close();
        self.notify_closed();
        Ok(())
    }

    fn abort(&self) {
        if self.state.abort() {
            self.abort_outstanding();
            self.notify_closed();
        }
    }
}

#[async_trait]
impl RequestSender for RequestChannel {
    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn via(&self) -> &str {
        &self.via
    }

    async fn request(&self, mut message: Message, timeout: Duration) -> Result<Message> {
        self.state.ensure_opened()?;
        let helper = TimeoutHelper::new(timeout);

        let id = self.prepare(&mut message);
        let (_pending, reply) = self.register(&message, &id)?;
        let _registration = Registration {
            channel: self,
            id: id.clone(),
        };
        tracing::trace!(channel = %self.id, request = %id, "sending request");

        let send_budget = helper.remaining();
        let sent = helper
            .run(
                TimeoutPhase::Send,
                self.transport.send_request(message, send_budget),
            )
            .await?;
        if let Some(reply) = sent {
            if !self.deliver_reply(reply) {
                return Err(MessageError::Protocol(format!(
                    "reply does not relate to request '{id}'"
                ))
                .into());
            }
        }

        let outcome = match tokio::time::timeout(helper.remaining(), reply).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ChannelError::Aborted(OBJECT)),
            Err(_) => Err(ChannelError::timeout(
                TimeoutPhase::ReceiveReply,
                helper.original_timeout(),
            )),
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chanprims_message::{MessageVersion, TextBodyWriter};
    use tokio::sync::mpsc;

    use super::*;

    const LONG: Duration = Duration::from_secs(5);

    /// Replies in-line with the request body.
    struct Echo;

    #[async_trait]
    impl RequestTransport for Echo {
        async fn send_request(
            &self,
            mut request: Message,
            _timeout: Duration,
        ) -> Result<Option<Message>> {
            let text = request.read_body_text()?;
            let mut reply = Message::with_body_writer(
                request.version(),
                "urn:test:reply",
                TextBodyWriter::new("echo", "urn:test", &text),
            );
            RequestReplyCorrelator::prepare_reply(&mut reply, &request);
            Ok(Some(reply))
        }
    }

    /// Forwards requests to the test, which replies out of band.
    struct Deferred(mpsc::UnboundedSender<Message>);

    #[async_trait]
    impl RequestTransport for Deferred {
        async fn send_request(
            &self,
            request: Message,
            _timeout: Duration,
        ) -> Result<Option<Message>> {
            self.0.send(request).map_err(|_| ChannelError::Aborted("test peer"))?;
            Ok(None)
        }
    }

    /// Never finishes sending.
    struct Stalled;

    #[async_trait]
    impl RequestTransport for Stalled {
        async fn send_request(
            &self,
            _request: Message,
            _timeout: Duration,
        ) -> Result<Option<Message>> {
            std::future::pending().await
        }
    }

    fn ping(text: &str) -> Message {
        Message::with_body_writer(
            MessageVersion::Soap12WSAddressing10,
            "urn:test:ping",
            TextBodyWriter::new("ping", "urn:test", text),
        )
    }

    async fn opened(transport: impl RequestTransport + 'static) -> Arc<RequestChannel> {
        let channel = Arc::new(RequestChannel::new(
            Arc::new(transport),
            "test://host/echo",
            "test://host/echo",
        ));
        channel.open(LONG).await.unwrap();
        channel
    }

    fn reply_for(request: &Message) -> Message {
        let mut reply = Message::empty(MessageVersion::Soap12WSAddressing10, "urn:test:reply");
        RequestReplyCorrelator::prepare_reply(&mut reply, request);
        reply
    }

    #[tokio::test]
    async fn request_requires_open() {
        let channel = RequestChannel::new(Arc::new(Echo), "test://a", "test://a");
        assert!(matches!(
            channel.request(ping("x"), LONG).await,
            Err(ChannelError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn inline_reply_is_correlated() {
        let channel = opened(Echo).await;
        let mut reply = channel.request(ping("hello"), LONG).await.unwrap();
        assert_eq!(reply.read_body_text().unwrap(), "hello");
        assert_eq!(channel.outstanding_count(), 0);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test]
    async fn request_headers_are_tagged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };

        let request = rx.recv().await.unwrap();
        assert!(request.headers().message_id.is_some());
        assert_eq!(request.headers().to.as_deref(), Some("test://host/echo"));
        assert_eq!(request.properties().via.as_deref(), Some("test://host/echo"));
        assert_eq!(channel.outstanding_count(), 1);

        assert!(channel.deliver_reply(reply_for(&request)));
        requester.await.unwrap().unwrap();
        assert_eq!(channel.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn manual_addressing_leaves_to_alone() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Arc::new(
            RequestChannel::new(Arc::new(Deferred(tx)), "test://host/echo", "test://host/echo")
                .with_manual_addressing(true),
        );
        channel.open(LONG).await.unwrap();
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };
        let request = rx.recv().await.unwrap();
        assert!(request.headers().to.is_none());
        channel.deliver_reply(reply_for(&request));
        requester.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_phase_timeout() {
        let channel = opened(Stalled).await;
        let err = channel
            .request(ping("x"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Timeout {
                phase: TimeoutPhase::Send,
                ..
            }
        ));
        assert_eq!(channel.outstanding_count(), 0);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test]
    async fn receive_reply_phase_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let err = channel
            .request(ping("x"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Timeout {
                phase: TimeoutPhase::ReceiveReply,
                timeout,
            } if timeout == Duration::from_millis(30)
        ));
        assert_eq!(channel.outstanding_count(), 0);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test]
    async fn late_reply_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        channel
            .request(ping("x"), Duration::from_millis(20))
            .await
            .unwrap_err();
        let request = rx.recv().await.unwrap();
        assert!(!channel.deliver_reply(reply_for(&request)));
    }

    #[tokio::test]
    async fn abort_fails_pending_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };
        rx.recv().await.unwrap();

        channel.abort();
        assert!(matches!(
            requester.await.unwrap(),
            Err(ChannelError::Aborted(_))
        ));
        assert_eq!(channel.state(), CommunicationState::Closed);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test]
    async fn fault_fails_pending_and_later_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };
        rx.recv().await.unwrap();

        channel.fault("connection reset");
        assert!(matches!(
            requester.await.unwrap(),
            Err(ChannelError::Faulted { .. })
        ));
        assert!(channel.correlator().is_empty());
        assert!(matches!(
            channel.request(ping("y"), LONG).await,
            Err(ChannelError::Faulted { .. })
        ));
        assert!(channel.close(LONG).await.is_err());
        assert_eq!(channel.state(), CommunicationState::Closed);
    }

    #[tokio::test]
    async fn close_waits_for_outstanding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };
        let request = rx.recv().await.unwrap();

        let closer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.close(LONG).await })
        };
        while channel.state() != CommunicationState::Closing {
            tokio::task::yield_now().await;
        }
        assert!(channel.deliver_reply(reply_for(&request)));
        requester.await.unwrap().unwrap();
        closer.await.unwrap().unwrap();
        assert_eq!(channel.state(), CommunicationState::Closed);
    }

    #[tokio::test]
    async fn close_aborts_stragglers_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requester = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.request(ping("x"), LONG).await })
        };
        rx.recv().await.unwrap();

        channel.close(Duration::from_millis(30)).await.unwrap();
        assert!(matches!(
            requester.await.unwrap(),
            Err(ChannelError::Aborted(_))
        ));
        assert_eq!(channel.state(), CommunicationState::Closed);
    }

    #[tokio::test]
    async fn registration_after_abort_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let mut message = ping("late");
        let id = channel.prepare(&mut message);

        channel.abort();
        assert!(channel.register(&message, &id).is_err());
        assert_eq!(channel.outstanding_count(), 0);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn no_request_outlives_a_concurrent_abort() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = opened(Deferred(tx)).await;
        let requests: Vec<_> = (0..64)
            .map(|i| {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move {
                    channel
                        .request(ping(&i.to_string()), Duration::from_secs(60))
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        channel.abort();

        for request in requests {
            let outcome = tokio::time::timeout(LONG, request)
                .await
                .expect("request finished after the abort")
                .unwrap();
            assert!(matches!(
                outcome,
                Err(ChannelError::Aborted(_) | ChannelError::ObjectDisposed(_))
            ));
        }
        assert_eq!(channel.outstanding_count(), 0);
        assert!(channel.correlator().is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_correlate_independently() {
        let channel = opened(Echo).await;
        let completed = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let channel = Arc::clone(&channel);
                let completed = Arc::clone(&completed);
                tokio::spawn(async move {
                    let text = format!("message {i}");
                    let mut reply = channel.request(ping(&text), LONG).await.unwrap();
                    assert_eq!(reply.read_body_text().unwrap(), text);
                    completed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 16);
        assert_eq!(channel.outstanding_count(), 0);
    }
}
