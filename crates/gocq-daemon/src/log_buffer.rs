//! Bounded log history with live fan-out to subscribers
//!
//! One [`LogBuffer`] exists per supervised process. The output readers are the
//! only writers; API callers read snapshots with [`LogBuffer::list`] and attach
//! live listeners with [`LogBuffer::subscribe`] / [`LogBuffer::subscribe_channel`].
//!
//! A single mutex guards both the history and the subscriber set. Delivery
//! happens while that lock is held and is always non-blocking, which gives:
//! - every subscriber sees entries in append order, exactly once
//! - no delivery reaches a subscriber after `unsubscribe` returns
//! - a stalled or disconnected subscriber is dropped instead of stalling ingestion

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use gocq_core::prelude::*;
use gocq_core::{DeliveryError, ProcessLog};

/// Default number of retained history entries
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Default bound of a channel subscriber's queue
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Handle identifying one registered subscriber
pub type SubscriptionId = u64;

/// Destination for live log entries.
///
/// `deliver` is called with the buffer lock held, so it must never block and
/// must not call back into the same buffer (that includes dropping one of its
/// [`LogSubscription`]s); the lock is not reentrant. Returning an error
/// unregisters the sink, which is dropped after the lock is released.
pub trait LogSink: Send + 'static {
    fn deliver(&mut self, log: &ProcessLog) -> std::result::Result<(), DeliveryError>;
}

impl LogSink for mpsc::Sender<ProcessLog> {
    fn deliver(&mut self, log: &ProcessLog) -> std::result::Result<(), DeliveryError> {
        self.try_send(log.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Adapter turning a closure into a [`LogSink`].
///
/// The closure runs under the buffer lock; see [`LogSink`].
pub struct FnSink<F>(pub F);

impl<F> LogSink for FnSink<F>
where
    F: FnMut(&ProcessLog) -> std::result::Result<(), DeliveryError> + Send + 'static,
{
    fn deliver(&mut self, log: &ProcessLog) -> std::result::Result<(), DeliveryError> {
        (self.0)(log)
    }
}

struct Inner {
    entries: VecDeque<ProcessLog>,
    subscribers: BTreeMap<SubscriptionId, Box<dyn LogSink>>,
    next_id: SubscriptionId,
    total: u64,
}

/// Bounded, ordered log history plus a live subscriber registry
pub struct LogBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LogBuffer")
            .field("capacity", &self.capacity)
            .field("len", &inner.entries.len())
            .field("subscribers", &inner.subscribers.len())
            .field("total", &inner.total)
            .finish()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBuffer {
    /// Create a buffer retaining at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
                subscribers: BTreeMap::new(),
                next_id: 1,
                total: 0,
            }),
            capacity,
        }
    }

    // A panicking sink must not take the whole buffer down with it.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry, evicting the oldest on overflow, then fan it out.
    ///
    /// Never fails: subscribers whose delivery fails are unregistered.
    pub fn append(&self, entry: ProcessLog) {
        let mut inner = self.lock();

        inner.entries.push_back(entry);
        if inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
        inner.total += 1;

        if inner.subscribers.is_empty() {
            return;
        }

        let Inner {
            entries,
            subscribers,
            ..
        } = &mut *inner;
        let Some(entry) = entries.back() else {
            return;
        };

        let failed: Vec<SubscriptionId> = subscribers
            .iter_mut()
            .filter_map(|(id, sink)| match sink.deliver(entry) {
                Ok(()) => None,
                Err(e) => {
                    debug!("Dropping log subscriber {}: {}", id, e);
                    Some(*id)
                }
            })
            .collect();
        let dropped: Vec<Box<dyn LogSink>> = failed
            .iter()
            .filter_map(|id| subscribers.remove(id))
            .collect();

        // A sink's destructor may unsubscribe from this buffer
        drop(inner);
        drop(dropped);
    }

    /// Snapshot of the retained history, oldest-first unless `reverse`.
    pub fn list(&self, reverse: bool) -> Vec<ProcessLog> {
        let inner = self.lock();
        if reverse {
            inner.entries.iter().rev().cloned().collect()
        } else {
            inner.entries.iter().cloned().collect()
        }
    }

    /// Register a sink for entries appended from now on. No history is replayed.
    pub fn subscribe(&self, sink: impl LogSink) -> SubscriptionId {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Box::new(sink));
        trace!("Log subscriber {} registered", id);
        id
    }

    /// Register a bounded channel subscriber.
    ///
    /// The returned [`LogSubscription`] unsubscribes itself when dropped. If the
    /// consumer falls `capacity` entries behind it is dropped and its stream ends.
    pub fn subscribe_channel(self: &Arc<Self>, capacity: usize) -> LogSubscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(tx);
        LogSubscription {
            id,
            rx,
            buffer: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = self.lock().subscribers.remove(&id);
        if removed.is_some() {
            trace!("Log subscriber {} removed", id);
        }
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries ever appended, including evicted ones
    pub fn total_appended(&self) -> u64 {
        self.lock().total
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop retained history. Subscribers stay registered.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

/// A live log stream backed by a bounded channel.
///
/// Ends (`recv` returns `None`) once the subscriber has been dropped by the
/// buffer for falling behind, or when the buffer itself is gone.
#[derive(Debug)]
pub struct LogSubscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<ProcessLog>,
    buffer: Weak<LogBuffer>,
}

impl LogSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next entry
    pub async fn recv(&mut self) -> Option<ProcessLog> {
        self.rx.recv().await
    }

    /// Take an entry if one is already queued
    pub fn try_recv(&mut self) -> std::result::Result<ProcessLog, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.upgrade() {
            buffer.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gocq_core::{LogLevel, LogStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn line(n: usize) -> ProcessLog {
        ProcessLog::from_output(LogStream::Stdout, &format!("line {}", n))
    }

    fn messages(logs: &[ProcessLog]) -> Vec<String> {
        logs.iter().map(|l| l.message.clone()).collect()
    }

    #[test]
    fn test_list_preserves_append_order() {
        let buffer = LogBuffer::new(10);
        for n in 0..5 {
            buffer.append(line(n));
        }

        let forward = messages(&buffer.list(false));
        assert_eq!(forward, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);

        let mut backward = messages(&buffer.list(true));
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let buffer = LogBuffer::new(3);
        for n in 0..5 {
            buffer.append(line(n));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_appended(), 5);
        assert_eq!(
            messages(&buffer.list(false)),
            vec!["line 2", "line 3", "line 4"]
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = LogBuffer::new(0);
        buffer.append(line(0));
        buffer.append(line(1));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(messages(&buffer.list(false)), vec!["line 1"]);
    }

    #[test]
    fn test_list_does_not_consume() {
        let buffer = LogBuffer::new(10);
        buffer.append(line(0));
        assert_eq!(buffer.list(false).len(), 1);
        assert_eq!(buffer.list(true).len(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_subscriber_gets_only_later_entries() {
        let buffer = Arc::new(LogBuffer::new(10));
        buffer.append(line(0));
        buffer.append(line(1));

        let mut sub = buffer.subscribe_channel(16);
        buffer.append(line(2));
        buffer.append(line(3));

        assert_eq!(sub.try_recv().unwrap().message, "line 2");
        assert_eq!(sub.try_recv().unwrap().message, "line 3");
        assert!(matches!(sub.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let buffer = LogBuffer::new(10);
        let (tx, mut rx) = mpsc::channel(8);
        let id = buffer.subscribe(tx);

        buffer.append(line(0));
        buffer.unsubscribe(id);
        buffer.unsubscribe(id);
        buffer.append(line(1));

        assert_eq!(rx.try_recv().unwrap().message, "line 0");
        // Sender was dropped with the registration
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_id_is_noop() {
        let buffer = LogBuffer::new(10);
        buffer.unsubscribe(999);
        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[test]
    fn test_closed_subscriber_is_dropped_without_affecting_others() {
        let buffer = LogBuffer::new(10);
        let (dead_tx, dead_rx) = mpsc::channel(4);
        let (live_tx, mut live_rx) = mpsc::channel(4);
        buffer.subscribe(dead_tx);
        buffer.subscribe(live_tx);
        drop(dead_rx);

        buffer.append(line(0));

        assert_eq!(buffer.subscriber_count(), 1);
        assert_eq!(live_rx.try_recv().unwrap().message, "line 0");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_full_subscriber_is_dropped() {
        let buffer = Arc::new(LogBuffer::new(10));
        let mut slow = buffer.subscribe_channel(2);
        let mut fast = buffer.subscribe_channel(16);

        for n in 0..4 {
            buffer.append(line(n));
        }

        assert_eq!(buffer.subscriber_count(), 1);
        // The slow consumer keeps what it had queued, then its stream ends.
        assert_eq!(slow.try_recv().unwrap().message, "line 0");
        assert_eq!(slow.try_recv().unwrap().message, "line 1");
        assert!(matches!(slow.try_recv(), Err(TryRecvError::Disconnected)));

        for n in 0..4 {
            assert_eq!(fast.try_recv().unwrap().message, format!("line {}", n));
        }
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let buffer = Arc::new(LogBuffer::new(10));
        let sub = buffer.subscribe_channel(4);
        assert_eq!(buffer.subscriber_count(), 1);
        drop(sub);
        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[test]
    fn test_failing_callback_is_removed() {
        let buffer = LogBuffer::new(10);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        buffer.subscribe(FnSink(move |_log: &ProcessLog| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::Closed)
        }));

        buffer.append(line(0));
        buffer.append(line(1));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[test]
    fn test_failed_sink_holding_a_subscription_is_released_after_unlock() {
        let buffer = Arc::new(LogBuffer::new(10));
        let nested = buffer.subscribe_channel(4);
        buffer.subscribe(FnSink(move |_log: &ProcessLog| {
            let _keep = &nested;
            Err(DeliveryError::Closed)
        }));
        assert_eq!(buffer.subscriber_count(), 2);

        // Dropping the sink drops `nested`, which unsubscribes from this buffer
        buffer.append(line(0));

        assert_eq!(buffer.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_sink_receives_in_order() {
        let buffer = LogBuffer::new(10);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        buffer.subscribe(FnSink(move |log: &ProcessLog| {
            sink_received.lock().unwrap().push(log.message.clone());
            Ok(())
        }));

        buffer.append(ProcessLog::internal(LogLevel::Info, "started"));
        buffer.append(line(1));

        assert_eq!(*received.lock().unwrap(), vec!["started", "line 1"]);
    }

    #[test]
    fn test_clear_keeps_subscribers() {
        let buffer = Arc::new(LogBuffer::new(10));
        let mut sub = buffer.subscribe_channel(4);
        buffer.append(line(0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.subscriber_count(), 1);
        buffer.append(line(1));
        assert_eq!(sub.try_recv().unwrap().message, "line 0");
        assert_eq!(sub.try_recv().unwrap().message, "line 1");
    }

    #[tokio::test]
    async fn test_concurrent_appends_reach_every_subscriber_in_order() {
        let buffer = Arc::new(LogBuffer::new(1000));
        let mut subs: Vec<_> = (0..3).map(|_| buffer.subscribe_channel(512)).collect();

        let writer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                for n in 0..200 {
                    buffer.append(line(n));
                    if n % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        // Churn the subscriber set while the writer runs
        for _ in 0..20 {
            let transient = buffer.subscribe_channel(1);
            tokio::task::yield_now().await;
            drop(transient);
        }

        writer.await.unwrap();

        for sub in subs.iter_mut() {
            for n in 0..200 {
                assert_eq!(sub.recv().await.unwrap().message, format!("line {}", n));
            }
        }
    }
}
