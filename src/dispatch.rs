//! Frame delivery to consumers.
//!
//! Ingestion must never wait on a consumer. [`Dispatcher::notify`] only appends to a single
//! bounded queue; when the queue is full the oldest undelivered frame is dropped and counted.
//! Consumers register callbacks with [`Dispatcher::subscribe`] and are invoked from the
//! cadence task, which wakes on a fixed interval and drains the queue in arrival order.
//!
//! This is the only delivery path: a frame reaches each subscriber at most once.
//!
//! ```text
//! ingestion ──notify──▶ [ bounded queue, drop-oldest ] ──drain every cadence──▶ callbacks
//! ```

use crate::frame::Frame;
use crate::stats::IngestStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Identifies a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Shortest cadence the delivery task will run at.
pub const MIN_CADENCE: Duration = Duration::from_millis(1);

type FrameCallback = Box<dyn FnMut(&Frame) + Send + 'static>;

struct Subscriber {
    id: SubscriptionId,
    name: String,
    callback: FrameCallback,
    delivered: u64,
}

/// Per-subscriber delivery metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberMetrics {
    /// Name given at subscription
    pub name: String,
    /// Frames handed to this subscriber
    pub delivered: u64,
}

/// Single-queue fan-out with drop-oldest backpressure.
pub struct Dispatcher {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    stats: Arc<IngestStats>,
}

impl Dispatcher {
    /// Create a dispatcher holding at most `capacity` undelivered frames.
    pub fn new(capacity: usize, stats: Arc<IngestStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            stats,
        }
    }

    /// Register a consumer of the frame stream.
    ///
    /// Callbacks run on the cadence task, in subscription order, once per frame. They must
    /// not call back into the dispatcher.
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(subscriber = %name, "Subscriber registered");
        lock(&self.subscribers).push(Subscriber {
            id,
            name,
            callback: Box::new(callback),
            delivered: 0,
        });
        id
    }

    /// Remove a consumer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Queue a frame for delivery. Never blocks on consumers.
    pub fn notify(&self, frame: Frame) {
        let mut queue = lock(&self.queue);
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.stats.add_frames_dropped(1);
        }
        queue.push_back(frame);
    }

    /// Deliver every queued frame to every subscriber. Returns the number of frames drained.
    pub fn drain(&self) -> usize {
        // Release the queue before running callbacks so ingestion is never held up
        let batch = std::mem::take(&mut *lock(&self.queue));
        if batch.is_empty() {
            return 0;
        }

        let mut subscribers = lock(&self.subscribers);
        for frame in &batch {
            for subscriber in subscribers.iter_mut() {
                (subscriber.callback)(frame);
                subscriber.delivered += 1;
            }
        }
        trace!(frames = batch.len(), "Drained dispatch queue");
        batch.len()
    }

    /// Discard undelivered frames. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.queue);
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    /// Frames waiting for the next drain.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Maximum frames held before the oldest is dropped.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Delivery metrics for every subscriber.
    pub fn metrics(&self) -> Vec<SubscriberMetrics> {
        lock(&self.subscribers)
            .iter()
            .map(|s| SubscriberMetrics {
                name: s.name.clone(),
                delivered: s.delivered,
            })
            .collect()
    }

    /// Spawn the cadence task: drain every `cadence` until `shutdown` flips to `true`,
    /// then drain one last time.
    pub fn spawn_cadence(
        self: &Arc<Self>,
        cadence: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let cadence = cadence.max(MIN_CADENCE);
        tokio::spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dispatcher.drain();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            dispatcher.drain();
            debug!("Cadence task stopped");
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// Callbacks may panic; the queue and subscriber list stay structurally valid regardless.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
