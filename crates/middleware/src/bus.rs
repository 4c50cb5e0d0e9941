//! In-process topic broker.
//!
//! Every subscriber owns a bounded queue that its receiver reads directly. A
//! subscriber with queue size `n` absorbs `n + 1` unread messages: the queue
//! plus the one its consumer would be handed next. Queue size 0 is
//! rendezvous: a publish succeeds only while the receiver is parked in
//! [`BusReceiver::recv`].
//!
//! Publishing never waits. It reserves a slot in every subscriber queue of
//! the topic first and sends only if all reservations succeed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BusError;

type SlotList<M> = Arc<Vec<Arc<Slot<M>>>>;

const DRAIN_POLL: Duration = Duration::from_millis(5);

struct Slot<M> {
    id: u64,
    queue: mpsc::Sender<M>,
    /// Rendezvous only: set while the receiver is parked in `recv`
    waiting: Option<Arc<AtomicBool>>,
}

impl<M> Slot<M> {
    fn drained(&self) -> bool {
        self.queue.is_closed() || self.queue.capacity() == self.queue.max_capacity()
    }
}

struct BusInner<M> {
    topics: DashMap<String, SlotList<M>>,
    queue_size: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl<M> BusInner<M> {
    fn remove(&self, topic: &str, id: u64) -> bool {
        let (removed, now_empty) = match self.topics.get_mut(topic) {
            Some(mut slots) => {
                let before = slots.len();
                let kept: Vec<_> = slots.iter().filter(|s| s.id != id).cloned().collect();
                let removed = kept.len() != before;
                let now_empty = kept.is_empty();
                *slots = Arc::new(kept);
                (removed, now_empty)
            }
            None => (false, false),
        };
        if now_empty {
            self.topics.remove_if(topic, |_, slots| slots.is_empty());
        }
        removed
    }
}

/// Topic broker shared by cloning; all clones address the same topics
pub struct EventBus<M> {
    inner: Arc<BusInner<M>>,
}

impl<M> Clone for EventBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Clone + Send + 'static> EventBus<M> {
    /// `queue_size` applies to every subscriber; 0 means rendezvous delivery
    pub fn new(queue_size: usize) -> Self {
        Self::with_cancel(queue_size, CancellationToken::new())
    }

    /// Receivers end when `parent` is cancelled
    pub fn with_cancel(queue_size: usize, parent: CancellationToken) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                queue_size,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                cancel: parent.child_token(),
            }),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue_size
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Deliver to every subscriber of `topic` or to none of them.
    ///
    /// Returns the number of subscribers reached; a topic without subscribers
    /// is not an error. Fails with `SubscriberFull` if any queue is saturated.
    pub fn publish(&self, topic: &str, message: M) -> Result<usize, BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let slots = match self.inner.topics.get(topic) {
            Some(slots) => Arc::clone(slots.value()),
            None => return Ok(0),
        };

        let mut claimed: Vec<&AtomicBool> = Vec::new();
        let mut permits = Vec::with_capacity(slots.len());
        let mut dead = Vec::new();
        let mut full = false;

        for slot in slots.iter() {
            if let Some(waiting) = &slot.waiting {
                if waiting
                    .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    full = true;
                    break;
                }
                claimed.push(waiting);
            }
            match slot.queue.try_reserve() {
                Ok(permit) => permits.push(permit),
                // receiver dropped without unsubscribing
                Err(mpsc::error::TrySendError::Closed(())) => dead.push(slot.id),
                Err(mpsc::error::TrySendError::Full(())) => {
                    full = true;
                    break;
                }
            }
        }

        for id in dead {
            if self.inner.remove(topic, id) {
                debug!(topic, id, "bus subscriber pruned");
            }
        }

        if full {
            for waiting in claimed {
                waiting.store(true, Ordering::Release);
            }
            return Err(BusError::SubscriberFull {
                topic: topic.to_string(),
            });
        }

        let delivered = permits.len();
        for permit in permits {
            permit.send(message.clone());
        }
        Ok(delivered)
    }

    /// Register a subscriber on `topic`.
    ///
    /// Dropping the receiver removes the subscription; dropping only the
    /// [`Unsubscribe`] handle leaves it active.
    pub fn subscribe(&self, topic: &str) -> Result<(BusReceiver<M>, Unsubscribe<M>), BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let rendezvous = self.inner.queue_size == 0;
        let (queue_tx, queue_rx) = mpsc::channel(self.inner.queue_size + 1);
        let waiting = rendezvous.then(|| Arc::new(AtomicBool::new(false)));
        let token = self.inner.cancel.child_token();

        let slot = Arc::new(Slot {
            id,
            queue: queue_tx,
            waiting: waiting.clone(),
        });
        {
            let mut slots = self.inner.topics.entry(topic.to_string()).or_default();
            let mut list = Vec::clone(&slots);
            list.push(slot);
            *slots = Arc::new(list);
        }
        debug!(topic, id, "bus subscriber added");

        Ok((
            BusReceiver {
                topic: topic.to_string(),
                id,
                queue: queue_rx,
                waiting,
                token: token.clone(),
                bus: Arc::downgrade(&self.inner),
            },
            Unsubscribe {
                topic: topic.to_string(),
                id,
                token,
                bus: Arc::downgrade(&self.inner),
            },
        ))
    }

    /// Remove `handle` from `topic`; unknown or repeated handles are a no-op
    pub fn unsubscribe(&self, topic: &str, handle: &Unsubscribe<M>) {
        if handle.topic == topic {
            handle.cancel();
        }
    }

    /// Stop accepting work, let subscribers drain their queues for up to
    /// `grace`, then force-close. Returns whether the drain finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.closed.store(true, Ordering::Release);
        let slots: Vec<Arc<Slot<M>>> = self
            .inner
            .topics
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        self.inner.topics.clear();

        let drained = tokio::time::timeout(grace, async {
            while !slots.iter().all(|slot| slot.drained()) {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(
                grace_ms = grace.as_millis() as u64,
                pending = slots.iter().filter(|slot| !slot.drained()).count(),
                "bus drain timed out, force closing"
            );
            self.inner.cancel.cancel();
        }
        // dropping the last senders ends every drained receiver
        drop(slots);
        drained
    }
}

/// Receiving side of one subscription. The sequence ends after unsubscribe
/// or bus shutdown.
pub struct BusReceiver<M> {
    topic: String,
    id: u64,
    queue: mpsc::Receiver<M>,
    waiting: Option<Arc<AtomicBool>>,
    token: CancellationToken,
    bus: Weak<BusInner<M>>,
}

/// Clears the rendezvous flag when `recv` returns or is cancelled
struct Parked<'a>(Option<&'a AtomicBool>);

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        if let Some(waiting) = self.0 {
            waiting.store(false, Ordering::Release);
        }
    }
}

impl<M: Send + 'static> BusReceiver<M> {
    pub async fn recv(&mut self) -> Option<M> {
        let parked = Parked(self.waiting.as_deref());
        if let Some(waiting) = parked.0 {
            waiting.store(true, Ordering::Release);
        }
        let message = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            message = self.queue.recv() => message,
        };
        drop(parked);
        message
    }

    /// Lazy sequence view of the subscription
    pub fn into_stream(self) -> impl Stream<Item = M> {
        futures_util::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
    }
}

impl<M> Drop for BusReceiver<M> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(&self.topic, self.id) {
                debug!(topic = %self.topic, id = self.id, "bus subscriber dropped");
            }
        }
    }
}

/// Cancellation handle for one subscription; `cancel` is idempotent
pub struct Unsubscribe<M> {
    topic: String,
    id: u64,
    token: CancellationToken,
    bus: Weak<BusInner<M>>,
}

impl<M> Unsubscribe<M> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            if bus.remove(&self.topic, self.id) {
                debug!(topic = %self.topic, id = self.id, "bus subscriber removed");
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
