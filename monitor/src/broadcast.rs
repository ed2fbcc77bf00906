//! Fan-out of live events to connected clients.
//!
//! Every subscriber owns a bounded queue drained by its connection task.
//! `publish` serializes the event once and `try_send`s it to each queue, so a
//! stalled client can never hold up the caller or the other subscribers:
//!
//! * queue closed (client gone): subscriber is pruned from the registry
//! * queue full (client stalled): the event is dropped for that subscriber only

use crate::metrics;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use txpulse_shared::LiveEvent;

pub type SubscriberId = u64;

/// Encoded event as delivered to subscribers. Shared between all queues.
pub type Frame = Arc<str>;

/// Receiving side of one live client.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Frame>,
}

/// Delivery outcome of one `publish` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose queue was full
    pub dropped: usize,
    /// Subscribers removed because their queue was closed
    pub pruned: Vec<SubscriberId>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: BTreeMap<SubscriberId, mpsc::Sender<Frame>>,
}

/// Registry of live subscribers.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            capacity: capacity.max(1),
        }
    }

    // Registry updates are single map operations; a panic elsewhere cannot
    // leave it half-modified, so a poisoned lock is still usable.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.insert(id, sender);
        metrics::LIVE_SUBSCRIBERS.set(registry.subscribers.len() as f64);
        tracing::debug!(subscriber = id, "Live subscriber added");
        Subscription { id, receiver }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut registry = self.registry();
        let removed = registry.subscribers.remove(&id).is_some();
        metrics::LIVE_SUBSCRIBERS.set(registry.subscribers.len() as f64);
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Send `event` to every active subscriber without waiting on any of them.
    pub fn publish(&self, event: &LiveEvent) -> PublishReport {
        let frame: Frame = match event.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(kind = ?event.kind, "Failed to encode live event: {}", e);
                return PublishReport::default();
            }
        };
        self.publish_frame(frame)
    }

    fn publish_frame(&self, frame: Frame) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.registry();

        for (id, sender) in &registry.subscribers {
            match sender.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "Live subscriber queue full, dropping event");
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => report.pruned.push(*id),
            }
        }
        for id in &report.pruned {
            registry.subscribers.remove(id);
            tracing::debug!(subscriber = id, "Pruned disconnected live subscriber");
        }
        let remaining = registry.subscribers.len();
        drop(registry);

        metrics::LIVE_SUBSCRIBERS.set(remaining as f64);
        metrics::LIVE_DELIVERIES
            .with_label_values(&["delivered"])
            .inc_by(report.delivered as f64);
        metrics::LIVE_DELIVERIES
            .with_label_values(&["dropped"])
            .inc_by(report.dropped as f64);
        metrics::LIVE_DELIVERIES
            .with_label_values(&["pruned"])
            .inc_by(report.pruned.len() as f64);
        report
    }
}
