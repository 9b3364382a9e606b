//! Commit-ordered fan-out for appended events.
//!
//! Every subscriber owns a bounded queue. Publishing never waits on a slow
//! subscriber for longer than the configured grace period; subscribers that
//! stay full past it (or hung up) are dropped and observe end-of-stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, warn};

use soulbrowser_core_types::SoulError;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<PublishReport, SoulError>;
    fn subscribe(&self) -> mpsc::Receiver<E>;
}

/// Outcome of a single publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Queue depth per subscriber.
    pub capacity: usize,
    /// Longest a publish waits on one full subscriber queue.
    pub grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            grace: Duration::from_millis(50),
        }
    }
}

struct Subscriber<E> {
    id: u64,
    sender: mpsc::Sender<E>,
}

impl<E> Clone for Subscriber<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

/// In-memory bus with per-subscriber bounded queues.
pub struct InMemoryBus<E>
where
    E: Event,
{
    config: BusConfig,
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new(Self::with_config(config))
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config: BusConfig {
                capacity: config.capacity.max(1),
                grace: config.grace,
            },
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Subscribers dropped since the bus was created.
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    fn remove(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        let mut guard = self.subscribers.lock();
        guard.retain(|sub| !ids.contains(&sub.id));
        self.dropped_total
            .fetch_add(ids.len() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<PublishReport, SoulError> {
        let snapshot: Vec<Subscriber<E>> = self.subscribers.lock().iter().cloned().collect();
        if snapshot.is_empty() {
            return Ok(PublishReport::default());
        }

        // One grace window shared by the whole publish, so N slow subscribers
        // cannot stretch the append path to N * grace.
        let deadline = Instant::now() + self.config.grace;
        let mut report = PublishReport::default();
        let mut dead = Vec::new();

        for sub in snapshot {
            match sub.sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id, "subscriber hung up");
                    dead.push(sub.id);
                }
                Err(TrySendError::Full(pending)) => {
                    match tokio::time::timeout_at(deadline, sub.sender.send(pending)).await {
                        Ok(Ok(())) => report.delivered += 1,
                        Ok(Err(_)) => dead.push(sub.id),
                        Err(_) => {
                            warn!(
                                subscriber = sub.id,
                                grace_ms = self.config.grace.as_millis() as u64,
                                "subscriber exceeded grace period; dropping"
                            );
                            dead.push(sub.id);
                        }
                    }
                }
            }
        }

        report.dropped = dead.len();
        self.remove(&dead);
        Ok(report)
    }

    fn subscribe(&self) -> mpsc::Receiver<E> {
        let (sender, receiver) = mpsc::channel(self.config.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, sender });
        receiver
    }
}
