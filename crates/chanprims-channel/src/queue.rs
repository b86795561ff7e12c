//! Producer/consumer queue behind input channels.
//!
//! Producers enqueue items (or failures); consumers await them with a
//! timeout. After shutdown, queued items are still handed out and then
//! every dequeue returns `Ok(None)`, or the fault if the queue was faulted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanprims_message::Message;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::channel::{Channel, ChannelId, ClosedNotifier, MessageReceiver};
use crate::error::{ChannelError, Result, TimeoutPhase};
use crate::state::{CommunicationObject, CommunicationState};
use crate::timeout::TimeoutHelper;

/// Invoked once the item it was enqueued with has been dequeued.
pub type DequeuedCallback = Arc<dyn Fn() + Send + Sync>;

enum Entry<T> {
    Item(T),
    Failure(ChannelError),
}

struct Slot<T> {
    entry: Entry<T>,
    on_dequeued: Option<DequeuedCallback>,
    run_inline: bool,
}

struct QueueState<T> {
    slots: VecDeque<Slot<T>>,
    waiters: usize,
    shutdown: bool,
    fault: Option<String>,
}

/// An async FIFO with shutdown and fault semantics.
pub struct InputQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
}

impl<T: Send> InputQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                slots: VecDeque::new(),
                waiters: 0,
                shutdown: false,
                fault: None,
            }),
            available: Notify::new(),
        }
    }

    /// Enqueue `item` and wake a waiting consumer.
    ///
    /// When `can_dispatch_on_this_thread` is false, `on_dequeued` runs on a
    /// spawned task instead of inline in the consumer. Returns false if the
    /// queue is shut down; the item is dropped and `on_dequeued` still runs.
    pub fn enqueue_and_dispatch(
        &self,
        item: T,
        on_dequeued: Option<DequeuedCallback>,
        can_dispatch_on_this_thread: bool,
    ) -> bool {
        if self
            .push(Entry::Item(item), on_dequeued, can_dispatch_on_this_thread)
            .is_none()
        {
            return false;
        }
        self.available.notify_one();
        true
    }

    /// Enqueue `item` without waking anyone.
    ///
    /// Returns true when a consumer is waiting and the caller must follow up
    /// with [`dispatch`](Self::dispatch).
    pub fn enqueue_without_dispatch(&self, item: T, on_dequeued: Option<DequeuedCallback>) -> bool {
        self.push(Entry::Item(item), on_dequeued, true)
            .is_some_and(|waiters| waiters > 0)
    }

    /// Wake one consumer if anything is queued.
    pub fn dispatch(&self) {
        if !self.state.lock().slots.is_empty() {
            self.available.notify_one();
        }
    }

    /// Queue a failure; the consumer that dequeues it receives the error.
    pub fn enqueue_failure(&self, error: ChannelError) {
        if self.push(Entry::Failure(error), None, true).is_some() {
            self.available.notify_one();
        }
    }

    /// Await the next item for at most `timeout`.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<T>> {
        let helper = TimeoutHelper::new(timeout);
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let waiter = {
                let mut state = self.state.lock();
                if let Some(slot) = state.slots.pop_front() {
                    drop(state);
                    return Self::complete(slot);
                }
                if state.shutdown {
                    return match &state.fault {
                        Some(reason) => Err(ChannelError::faulted("input queue", reason.clone())),
                        None => Ok(None),
                    };
                }
                state.waiters += 1;
                WaiterGuard { queue: self }
            };

            let woken = tokio::time::timeout(helper.remaining(), notified).await;
            drop(waiter);
            if woken.is_err() {
                // An item may have raced the deadline; hand it out rather than strand it.
                let slot = self.state.lock().slots.pop_front();
                if let Some(slot) = slot {
                    return Self::complete(slot);
                }
                return Err(ChannelError::timeout(
                    TimeoutPhase::Receive,
                    helper.original_timeout(),
                ));
            }
        }
    }

    /// Stop accepting items and release every waiting consumer.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.available.notify_waiters();
    }

    /// Shut down so that, once drained, consumers see `reason` as a fault.
    pub fn fault(&self, reason: impl Into<String>) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.fault.get_or_insert_with(|| reason.into());
        }
        self.available.notify_waiters();
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Returns the waiter count before the push, or `None` when shut down.
    fn push(
        &self,
        entry: Entry<T>,
        on_dequeued: Option<DequeuedCallback>,
        run_inline: bool,
    ) -> Option<usize> {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            tracing::trace!("input queue shut down, dropping item");
            if let Some(callback) = on_dequeued {
                callback();
            }
            return None;
        }
        state.slots.push_back(Slot {
            entry,
            on_dequeued,
            run_inline,
        });
        Some(state.waiters)
    }

    fn complete(slot: Slot<T>) -> Result<Option<T>> {
        if let Some(callback) = slot.on_dequeued {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) if !slot.run_inline => {
                    handle.spawn(async move { callback() });
                }
                _ => callback(),
            }
        }
        match slot.entry {
            Entry::Item(item) => Ok(Some(item)),
            Entry::Failure(error) => Err(error),
        }
    }
}

impl<T: Send> Default for InputQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InputQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InputQueue")
            .field("pending", &state.slots.len())
            .field("waiters", &state.waiters)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

struct WaiterGuard<'a, T> {
    queue: &'a InputQueue<T>,
}

impl<T> Drop for WaiterGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.queue.state.lock();
        state.waiters = state.waiters.saturating_sub(1);
    }
}

/// An input queue with a channel lifecycle.
pub struct InputQueueChannel<T> {
    id: ChannelId,
    state: CommunicationObject,
    queue: InputQueue<T>,
    notifier: Option<ClosedNotifier>,
}

impl<T: Send> InputQueueChannel<T> {
    pub fn new() -> Self {
        Self {
            id: ChannelId::next(),
            state: CommunicationObject::new("input channel"),
            queue: InputQueue::new(),
            notifier: None,
        }
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

    pub fn enqueue_and_dispatch(
        &self,
        item: T,
        on_dequeued: Option<DequeuedCallback>,
        can_dispatch_on_this_thread: bool,
    ) -> bool {
        self.queue
            .enqueue_and_dispatch(item, on_dequeued, can_dispatch_on_this_thread)
    }

    pub fn enqueue_without_dispatch(&self, item: T, on_dequeued: Option<DequeuedCallback>) -> bool {
        self.queue.enqueue_without_dispatch(item, on_dequeued)
    }

    pub fn dispatch(&self) {
        self.queue.dispatch();
    }

    pub fn enqueue_failure(&self, error: ChannelError) {
        self.queue.enqueue_failure(error);
    }

    /// Items waiting to be received. Only valid once opened.
    pub fn pending_items(&self) -> Result<usize> {
        self.state.ensure_opened()?;
        Ok(self.queue.pending_count())
    }

    pub(crate) fn internal_pending_items(&self) -> usize {
        self.queue.pending_count()
    }

    /// Await the next item. Fails until opened; yields `Ok(None)` once the
    /// channel is closed and drained.
    pub async fn receive_item(&self, timeout: Duration) -> Result<Option<T>> {
        if matches!(
            self.state.state(),
            CommunicationState::Created | CommunicationState::Opening
        ) {
            self.state.ensure_opened()?;
        }
        self.queue.dequeue(timeout).await
    }

    /// Fault the channel; receivers see the fault once queued items drain.
    pub fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.state.fault(reason.clone()) {
            tracing::warn!(channel = %self.id, %reason, "input channel faulted");
            self.queue.fault(reason);
        }
    }

    fn shut_down(&self) {
        self.queue.shutdown();
        if let Some(notifier) = &self.notifier {
            notifier.notify();
        }
    }
}

impl<T: Send> Default for InputQueueChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InputQueueChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputQueueChannel")
            .field("id", &self.id)
            .field("state", &self.state.state())
            .field("queue", &self.queue)
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Channel for InputQueueChannel<T> {
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
        match self.state.begin_close() {
            Ok(true) => {
                self.shut_down();
                self.state.complete_close();
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
            self.shut_down();
        }
    }
}

#[async_trait]
impl MessageReceiver for InputQueueChannel<Message> {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>> {
        self.receive_item(timeout).await
    }
}
