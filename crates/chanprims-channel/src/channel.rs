//! Channel capabilities and identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanprims_message::Message;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::state::CommunicationState;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identity, used as the tracking key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// The message exchange pattern a factory produces channels for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelShape {
    /// Send a request and await its correlated reply.
    Request,
    /// One-way send.
    Output,
    /// One-way receive.
    Input,
}

impl fmt::Display for ChannelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelShape::Request => "request",
            ChannelShape::Output => "output",
            ChannelShape::Input => "input",
        })
    }
}

/// Sent by a channel to its owner once it reaches `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed(pub ChannelId);

/// A channel's handle for reporting its own close to the owning factory.
#[derive(Debug, Clone)]
pub struct ClosedNotifier {
    id: ChannelId,
    tx: mpsc::UnboundedSender<ChannelClosed>,
}

impl ClosedNotifier {
    pub(crate) fn new(id: ChannelId, tx: mpsc::UnboundedSender<ChannelClosed>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn notify(&self) {
        // The owner may already be gone; nothing is left to update then.
        if self.tx.send(ChannelClosed(self.id)).is_err() {
            tracing::trace!(channel = %self.id, "owner gone, close notification dropped");
        }
    }
}

/// Lifecycle shared by every channel.
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn state(&self) -> CommunicationState;

    async fn open(&self, timeout: Duration) -> Result<()>;

    /// Close gracefully within `timeout`; failures fall back to abort.
    async fn close(&self, timeout: Duration) -> Result<()>;

    /// Close immediately. Never fails.
    fn abort(&self);
}

/// A channel that sends requests and awaits correlated replies.
#[async_trait]
pub trait RequestSender: Channel {
    fn remote_address(&self) -> &str;

    fn via(&self) -> &str;

    async fn request(&self, message: Message, timeout: Duration) -> Result<Message>;
}

/// A channel that sends one-way messages.
#[async_trait]
pub trait MessageSender: Channel {
    fn remote_address(&self) -> &str;

    async fn send(&self, message: Message, timeout: Duration) -> Result<()>;
}

/// A channel that receives one-way messages.
#[async_trait]
pub trait MessageReceiver: Channel {
    /// `Ok(None)` once the channel has shut down and drained.
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>>;
}

/// A channel produced by a factory, tagged by shape.
#[derive(Clone)]
pub enum ChannelHandle {
    Request(Arc<dyn RequestSender>),
    Output(Arc<dyn MessageSender>),
    Input(Arc<dyn MessageReceiver>),
}

impl ChannelHandle {
    pub fn shape(&self) -> ChannelShape {
        match self {
            ChannelHandle::Request(_) => ChannelShape::Request,
            ChannelHandle::Output(_) => ChannelShape::Output,
            ChannelHandle::Input(_) => ChannelShape::Input,
        }
    }

    pub fn id(&self) -> ChannelId {
        match self {
            ChannelHandle::Request(channel) => channel.id(),
            ChannelHandle::Output(channel) => channel.id(),
            ChannelHandle::Input(channel) => channel.id(),
        }
    }

    pub fn state(&self) -> CommunicationState {
        match self {
            ChannelHandle::Request(channel) => channel.state(),
            ChannelHandle::Output(channel) => channel.state(),
            ChannelHandle::Input(channel) => channel.state(),
        }
    }

    pub fn into_request(self) -> Option<Arc<dyn RequestSender>> {
        match self {
            ChannelHandle::Request(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn into_output(self) -> Option<Arc<dyn MessageSender>> {
        match self {
            ChannelHandle::Output(channel) => Some(channel),
            _ => None,
        }
    }

    pub fn into_input(self) -> Option<Arc<dyn MessageReceiver>> {
        match self {
            ChannelHandle::Input(channel) => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("shape", &self.shape())
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
        assert!(a.to_string().starts_with("channel-"));
    }

    #[tokio::test]
    async fn notifier_reports_its_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ChannelId::next();
        ClosedNotifier::new(id, tx).notify();
        assert_eq!(rx.recv().await, Some(ChannelClosed(id)));
    }

    #[test]
    fn notifier_without_owner_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ClosedNotifier::new(ChannelId::next(), tx).notify();
    }
}
