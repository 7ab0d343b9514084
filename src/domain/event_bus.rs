//! Broadcast channel for committed domain changes.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Synchronizers
//! publish a [`DomainChange`] after each successful commit, and every
//! WebSocket connection subscribes to receive filtered changes.

use tokio::sync::broadcast;

use super::DomainChange;

/// Broadcast bus for [`DomainChange`]s.
///
/// When the ring buffer is full, the oldest changes are dropped for
/// lagging receivers. Publishing with no receivers is a silent no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainChange>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a change to all subscribers.
    ///
    /// Returns the number of receivers that received the change.
    pub fn publish(&self, change: DomainChange) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainChange> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_change(auction_id: i64) -> DomainChange {
        DomainChange::AuctionCanceled {
            auction_id,
            on_chain_id: auction_id + 100,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(make_change(1)), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_change() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);

        let delivered = bus.publish(make_change(7));
        assert_eq!(delivered, 1);

        let Ok(change) = rx.recv().await else {
            panic!("expected change");
        };
        let DomainChange::AuctionCanceled { auction_id, .. } = change else {
            panic!("unexpected change variant");
        };
        assert_eq!(auction_id, 7);
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.publish(make_change(3)), 2);
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
