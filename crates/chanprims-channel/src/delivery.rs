//! Delivery strategies for sequenced input.
//!
//! A strategy decides whether a sequence-numbered item may be accepted and
//! when it becomes visible on the underlying [`InputQueueChannel`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::queue::{DequeuedCallback, InputQueueChannel};

/// Releases an item that will never be delivered.
pub type ItemDisposer<T> = Box<dyn Fn(T) + Send + Sync>;

/// Admission and release policy for sequence-numbered items.
pub trait DeliveryStrategy<T>: Send {
    fn quota(&self) -> usize;

    /// Items accepted but not yet received, buffered or queued.
    fn enqueued_count(&self) -> usize;

    fn can_enqueue(&self, sequence_number: i64) -> bool;

    /// Accept `item`. Returns true when the caller must dispatch the channel.
    fn enqueue(
        &mut self,
        item: T,
        sequence_number: i64,
        on_dequeued: Option<DequeuedCallback>,
    ) -> bool;

    /// Release every item still held by the strategy.
    fn dispose(&mut self);
}

/// Delivers items as they arrive, bounded by `quota`.
pub struct UnorderedDeliveryStrategy<T> {
    channel: Arc<InputQueueChannel<T>>,
    quota: usize,
}

impl<T: Send> UnorderedDeliveryStrategy<T> {
    pub fn new(channel: Arc<InputQueueChannel<T>>, quota: usize) -> Self {
        Self { channel, quota }
    }
}

impl<T: Send> DeliveryStrategy<T> for UnorderedDeliveryStrategy<T> {
    fn quota(&self) -> usize {
        self.quota
    }

    fn enqueued_count(&self) -> usize {
        self.channel.internal_pending_items()
    }

    fn can_enqueue(&self, _sequence_number: i64) -> bool {
        self.enqueued_count() < self.quota
    }

    fn enqueue(
        &mut self,
        item: T,
        _sequence_number: i64,
        on_dequeued: Option<DequeuedCallback>,
    ) -> bool {
        self.channel.enqueue_without_dispatch(item, on_dequeued)
    }

    fn dispose(&mut self) {}
}

/// Delivers items in sequence order starting at 1, buffering any that
/// arrive ahead of the window.
pub struct OrderedDeliveryStrategy<T> {
    channel: Arc<InputQueueChannel<T>>,
    quota: usize,
    in_order: bool,
    window_start: i64,
    items: BTreeMap<i64, T>,
    disposer: Option<ItemDisposer<T>>,
}

impl<T: Send> OrderedDeliveryStrategy<T> {
    /// With `in_order`, only the next expected item is admitted; otherwise
    /// items within the quota-sized window ahead of it are buffered.
    pub fn new(channel: Arc<InputQueueChannel<T>>, quota: usize, in_order: bool) -> Self {
        Self {
            channel,
            quota,
            in_order,
            window_start: 1,
            items: BTreeMap::new(),
            disposer: None,
        }
    }

    /// Hand undelivered items to `disposer` instead of dropping them.
    pub fn with_disposer(mut self, disposer: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.disposer = Some(Box::new(disposer));
        self
    }

    /// The next sequence number expected.
    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    pub fn buffered_count(&self) -> usize {
        self.items.len()
    }

    fn release(&self, sequence_number: i64, item: T) {
        tracing::trace!(sequence_number, "disposing undelivered item");
        if let Some(disposer) = &self.disposer {
            disposer(item);
        }
    }
}

impl<T: Send> DeliveryStrategy<T> for OrderedDeliveryStrategy<T> {
    fn quota(&self) -> usize {
        self.quota
    }

    fn enqueued_count(&self) -> usize {
        self.channel.internal_pending_items() + self.items.len()
    }

    fn can_enqueue(&self, sequence_number: i64) -> bool {
        let enqueued = self.enqueued_count();
        if enqueued >= self.quota {
            return false;
        }
        if self.in_order && sequence_number > self.window_start {
            return false;
        }
        if self.items.contains_key(&sequence_number) {
            return false;
        }
        let depth = i64::try_from(self.channel.internal_pending_items()).unwrap_or(i64::MAX);
        let ahead = sequence_number.saturating_sub(self.window_start);
        let quota = i64::try_from(self.quota).unwrap_or(i64::MAX);
        depth.saturating_add(ahead) < quota
    }

    fn enqueue(
        &mut self,
        item: T,
        sequence_number: i64,
        on_dequeued: Option<DequeuedCallback>,
    ) -> bool {
        if sequence_number > self.window_start {
            tracing::trace!(
                sequence_number,
                window_start = self.window_start,
                "buffering out-of-order item"
            );
            if let Some(displaced) = self.items.insert(sequence_number, item) {
                self.release(sequence_number, displaced);
            }
            return false;
        }

        self.window_start += 1;
        let mut item = item;
        while let Some(next) = self.items.remove(&self.window_start) {
            // every released item after the first gets its own dispatch
            if self.channel.enqueue_without_dispatch(item, on_dequeued.clone()) {
                self.channel.dispatch();
            }
            item = next;
            self.window_start += 1;
        }
        self.channel.enqueue_without_dispatch(item, on_dequeued)
    }

    fn dispose(&mut self) {
        while let Some((sequence_number, item)) = self.items.pop_first() {
            self.release(sequence_number, item);
        }
    }
}

impl<T> fmt::Debug for OrderedDeliveryStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedDeliveryStrategy")
            .field("quota", &self.quota)
            .field("in_order", &self.in_order)
            .field("window_start", &self.window_start)
            .field("buffered", &self.items.len())
            .finish()
    }
}

/// An input channel fed through a delivery strategy.
pub struct SequencedReceiver<T> {
    channel: Arc<InputQueueChannel<T>>,
    strategy: Mutex<Box<dyn DeliveryStrategy<T>>>,
}

impl<T: Send + 'static> SequencedReceiver<T> {
    pub fn new(channel: Arc<InputQueueChannel<T>>, strategy: Box<dyn DeliveryStrategy<T>>) -> Self {
        Self {
            channel,
            strategy: Mutex::new(strategy),
        }
    }

    pub fn unordered(quota: usize) -> Self {
        let channel = Arc::new(InputQueueChannel::new());
        let strategy = UnorderedDeliveryStrategy::new(Arc::clone(&channel), quota);
        Self::new(channel, Box::new(strategy))
    }

    pub fn ordered(quota: usize, in_order: bool) -> Self {
        let channel = Arc::new(InputQueueChannel::new());
        let strategy = OrderedDeliveryStrategy::new(Arc::clone(&channel), quota, in_order);
        Self::new(channel, Box::new(strategy))
    }

    pub fn channel(&self) -> &Arc<InputQueueChannel<T>> {
        &self.channel
    }

    /// Offer `item` with its sequence number.
    ///
    /// Returns `Ok(false)` when the strategy has no room for it; the caller
    /// keeps the sequence number unacknowledged and retries later.
    pub fn offer(&self, item: T, sequence_number: i64) -> Result<bool> {
        self.offer_with_callback(item, sequence_number, None)
    }

    pub fn offer_with_callback(
        &self,
        item: T,
        sequence_number: i64,
        on_dequeued: Option<DequeuedCallback>,
    ) -> Result<bool> {
        self.channel.communication().ensure_opened()?;
        let dispatch = {
            let mut strategy = self.strategy.lock();
            if !strategy.can_enqueue(sequence_number) {
                tracing::debug!(
                    sequence_number,
                    quota = strategy.quota(),
                    "item rejected by delivery strategy"
                );
                return Ok(false);
            }
            strategy.enqueue(item, sequence_number, on_dequeued)
        };
        if dispatch {
            self.channel.dispatch();
        }
        Ok(true)
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Option<T>> {
        self.channel.receive_item(timeout).await
    }

    pub fn enqueued_count(&self) -> usize {
        self.strategy.lock().enqueued_count()
    }

    pub fn dispose(&self) {
        self.strategy.lock().dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::channel::Channel;

    const LONG: Duration = Duration::from_secs(5);

    async fn opened<T: Send + 'static>() -> Arc<InputQueueChannel<T>> {
        let channel = Arc::new(InputQueueChannel::new());
        channel.open(LONG).await.unwrap();
        channel
    }

    async fn drain(channel: &InputQueueChannel<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while channel.internal_pending_items() > 0 {
            out.push(channel.receive_item(LONG).await.unwrap().unwrap());
        }
        out
    }

    fn permutations(items: &[u32]) -> Vec<Vec<u32>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, &first) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                out.push(tail);
            }
        }
        out
    }

    #[tokio::test]
    async fn unordered_admits_up_to_quota() {
        let channel = opened::<u32>().await;
        let mut strategy = UnorderedDeliveryStrategy::new(Arc::clone(&channel), 2);
        assert!(strategy.can_enqueue(7));
        strategy.enqueue(7, 7, None);
        strategy.enqueue(3, 3, None);
        assert!(!strategy.can_enqueue(1));

        assert_eq!(drain(&channel).await, vec![7, 3]);
        assert!(strategy.can_enqueue(1));
    }

    #[tokio::test]
    async fn ordered_delivers_every_permutation_in_order() {
        for order in permutations(&[1, 2, 3, 4, 5]) {
            let channel = opened::<u32>().await;
            let mut strategy = OrderedDeliveryStrategy::new(Arc::clone(&channel), 5, false);
            for &seq in &order {
                assert!(strategy.can_enqueue(i64::from(seq)), "order {order:?} seq {seq}");
                strategy.enqueue(seq, i64::from(seq), None);
            }
            assert_eq!(strategy.window_start(), 6);
            assert_eq!(drain(&channel).await, vec![1, 2, 3, 4, 5], "order {order:?}");
        }
    }

    #[tokio::test]
    async fn ordered_buffers_ahead_of_window() {
        let channel = opened::<u32>().await;
        let mut strategy = OrderedDeliveryStrategy::new(Arc::clone(&channel), 8, false);
        assert!(!strategy.enqueue(3, 3, None));
        assert!(!strategy.enqueue(2, 2, None));
        assert_eq!(strategy.buffered_count(), 2);
        assert_eq!(channel.internal_pending_items(), 0);

        strategy.enqueue(1, 1, None);
        assert_eq!(strategy.buffered_count(), 0);
        assert_eq!(drain(&channel).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn strict_mode_rejects_gaps() {
        let channel = opened::<u32>().await;
        let strategy = OrderedDeliveryStrategy::new(channel, 10, true);
        assert!(strategy.can_enqueue(1));
        assert!(!strategy.can_enqueue(2));
    }

    #[tokio::test]
    async fn relaxed_mode_bounds_the_window() {
        let channel = opened::<u32>().await;
        let mut strategy = OrderedDeliveryStrategy::new(Arc::clone(&channel), 3, false);
        assert!(strategy.can_enqueue(3));
        assert!(!strategy.can_enqueue(4));

        strategy.enqueue(2, 2, None);
        strategy.enqueue(3, 3, None);
        assert!(!strategy.can_enqueue(4));
        assert!(strategy.can_enqueue(1));

        strategy.enqueue(1, 1, None);
        assert_eq!(channel.internal_pending_items(), 3);
        assert!(!strategy.can_enqueue(4), "at quota");
    }

    #[tokio::test]
    async fn dispose_releases_buffered_items() {
        let channel = opened::<u32>().await;
        let released = Arc::new(AtomicUsize::new(0));
        let mut strategy = {
            let released = Arc::clone(&released);
            OrderedDeliveryStrategy::new(channel, 100, false).with_disposer(move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        for seq in 2..50 {
            strategy.enqueue(seq as u32, seq, None);
        }
        strategy.dispose();
        assert_eq!(released.load(Ordering::SeqCst), 48);
        assert_eq!(strategy.buffered_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_sequence_numbers_are_not_lost() {
        let channel = opened::<u32>().await;
        let released = Arc::new(AtomicUsize::new(0));
        let mut strategy = {
            let released = Arc::clone(&released);
            OrderedDeliveryStrategy::new(channel, 10, false).with_disposer(move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(strategy.can_enqueue(3));
        strategy.enqueue(30, 3, None);
        assert!(!strategy.can_enqueue(3), "3 is already buffered");

        strategy.enqueue(31, 3, None);
        assert_eq!(released.load(Ordering::SeqCst), 1, "the displaced item");
        assert_eq!(strategy.buffered_count(), 1);

        strategy.dispose();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn receiver_rejects_a_buffered_duplicate() {
        let receiver = SequencedReceiver::<u32>::ordered(4, false);
        receiver.channel().open(LONG).await.unwrap();
        assert!(receiver.offer(20, 2).unwrap());
        assert!(!receiver.offer(21, 2).unwrap());
        assert!(receiver.offer(10, 1).unwrap());

        assert_eq!(drain(receiver.channel()).await, vec![10, 20]);
    }

    #[tokio::test]
    async fn receiver_offers_and_receives_in_order() {
        let receiver = Arc::new(SequencedReceiver::<u32>::ordered(4, false));
        assert!(receiver.offer(1, 1).is_err(), "channel not opened yet");
        receiver.channel().open(LONG).await.unwrap();

        let consumer = {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                let mut got = Vec::new();
                for _ in 0..3 {
                    got.push(receiver.receive(LONG).await.unwrap().unwrap());
                }
                got
            })
        };

        assert!(receiver.offer(3, 3).unwrap());
        assert!(receiver.offer(2, 2).unwrap());
        assert!(receiver.offer(1, 1).unwrap());
        assert_eq!(consumer.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn receiver_reports_backpressure() {
        let receiver = SequencedReceiver::<u32>::unordered(1);
        receiver.channel().open(LONG).await.unwrap();
        assert!(receiver.offer(1, 1).unwrap());
        assert!(!receiver.offer(2, 2).unwrap());
        assert_eq!(receiver.enqueued_count(), 1);
        receiver.dispose();
    }
}
