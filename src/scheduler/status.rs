//! Status event fan-out.
//!
//! Commit sessions publish one [`StatusEvent`] per finished render. Each
//! subscriber gets its own bounded channel; the registration lives exactly
//! as long as the returned [`Subscription`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::assets::AssetStatus;

/// Final status of one rendered asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub id: String,
    pub status: AssetStatus,
    /// Renderer kind that produced the status.
    pub kind: String,
}

impl StatusEvent {
    pub fn new(id: impl Into<String>, status: AssetStatus, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            kind: kind.into(),
        }
    }
}

type Subscribers = Mutex<HashMap<u64, mpsc::Sender<StatusEvent>>>;

struct BusInner {
    next_id: AtomicU64,
    subscribers: Subscribers,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Subscribe/unsubscribe registry for status events.
#[derive(Clone)]
pub struct StatusBus {
    inner: Arc<BusInner>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a listener with a channel of `buffer` events.
    pub fn subscribe(&self, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber, waiting for room in full
    /// channels. Returns how many subscribers received it.
    pub async fn publish(&self, event: StatusEvent) -> usize {
        let targets: Vec<(u64, mpsc::Sender<StatusEvent>)> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                debug!(subscriber = id, "Dropping closed status subscriber");
                self.inner.remove(id);
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A live registration on a [`StatusBus`]; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<StatusEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_fans_out() {
        let bus = StatusBus::new();
        let mut a = bus.subscribe(4);
        let mut b = bus.subscribe(4);

        let event = StatusEvent::new("id-1", AssetStatus::Complete, "kind");
        assert_eq!(bus.publish(event.clone()).await, 2);
        assert_eq!(a.recv().await, Some(event.clone()));
        assert_eq!(b.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = StatusBus::new();
        let sub = bus.subscribe(1);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        let delivered = bus
            .publish(StatusEvent::new("id", AssetStatus::Complete, "k"))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscription_outliving_bus() {
        let bus = StatusBus::new();
        let mut sub = bus.subscribe(1);
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }
}
