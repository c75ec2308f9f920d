//! Subscriber bookkeeping for push-style delivery.

use rand::Rng;
use relayq_common::constants::protocol::SUBSCRIBE_ACK;
use relayq_common::{Item, QueueError};
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};

/// Where a subscriber's notifications go
pub type SubscriberChannel = mpsc::UnboundedSender<Item>;

#[derive(Default)]
struct Members {
    channels: HashMap<String, SubscriberChannel>,
    /// Registration order, for uniform index selection
    order: Vec<String>,
}

/// Maps subscriber identities (transport addresses) to their channels
#[derive(Default)]
pub struct SubscriberRegistry {
    members: RwLock<Members>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity`; returns the acknowledgement text
    pub async fn subscribe(
        &self,
        identity: &str,
        channel: SubscriberChannel,
    ) -> Result<&'static str, QueueError> {
        let mut members = self.members.write().await;
        if members.channels.contains_key(identity) {
            return Err(QueueError::AlreadySubscribed(identity.to_string()));
        }
        members.channels.insert(identity.to_string(), channel);
        members.order.push(identity.to_string());

        tracing::info!(subscriber = %identity, total = members.order.len(), "Subscriber registered");
        Ok(SUBSCRIBE_ACK)
    }

    /// Remove `identity`; a no-op when absent
    pub async fn unsubscribe(&self, identity: &str) {
        let mut members = self.members.write().await;
        if members.channels.remove(identity).is_some() {
            members.order.retain(|id| id != identity);
            tracing::info!(subscriber = %identity, total = members.order.len(), "Subscriber removed");
        }
    }

    /// Hand `item` to one subscriber chosen uniformly at random.
    ///
    /// One shot: there is no acknowledgement and no retry on another
    /// subscriber if the chosen channel is gone.
    pub async fn dispatch(&self, item: Item) -> Result<(), QueueError> {
        let members = self.members.read().await;
        if members.order.is_empty() {
            return Err(QueueError::NoSubscribers);
        }

        let index = rand::rng().random_range(0..members.order.len());
        let identity = &members.order[index];
        let channel = &members.channels[identity];

        channel.send(item).map_err(|e| {
            tracing::warn!(subscriber = %identity, key = %e.0.key, "Subscriber channel closed");
            QueueError::DeliveryFailed(identity.clone())
        })
    }

    pub async fn has_subscribers(&self) -> bool {
        !self.members.read().await.order.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_twice_rejected() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        assert_eq!(registry.subscribe("127.0.0.1:5000", tx.clone()).await, Ok(SUBSCRIBE_ACK));
        assert_eq!(
            registry.subscribe("127.0.0.1:5000", tx).await,
            Err(QueueError::AlreadySubscribed("127.0.0.1:5000".to_string()))
        );
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_idempotent() {
        let registry = SubscriberRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.subscribe("a", tx).await.unwrap();

        registry.unsubscribe("a").await;
        registry.unsubscribe("a").await;
        registry.unsubscribe("never").await;
        assert!(!registry.has_subscribers().await);
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers() {
        let registry = SubscriberRegistry::new();
        assert_eq!(
            registry.dispatch(Item::new("a", "1")).await,
            Err(QueueError::NoSubscribers)
        );
    }

    #[tokio::test]
    async fn test_dispatch_to_closed_channel() {
        let registry = SubscriberRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe("gone", tx).await.unwrap();
        drop(rx);

        assert_eq!(
            registry.dispatch(Item::new("a", "1")).await,
            Err(QueueError::DeliveryFailed("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn test_each_dispatch_reaches_exactly_one_subscriber() {
        let registry = SubscriberRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.subscribe("a", tx_a).await.unwrap();
        registry.subscribe("b", tx_b).await.unwrap();

        for i in 0..1000 {
            registry.dispatch(Item::new(format!("k{i}"), "v")).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut count_a = 0;
        while let Ok(item) = rx_a.try_recv() {
            assert!(seen.insert(item.key));
            count_a += 1;
        }
        let mut count_b = 0;
        while let Ok(item) = rx_b.try_recv() {
            assert!(seen.insert(item.key));
            count_b += 1;
        }

        assert_eq!(count_a + count_b, 1000);
        assert_eq!(seen.len(), 1000);
        // Uniform choice: both sides see a fair share
        assert!(count_a > 350 && count_b > 350, "a={count_a} b={count_b}");
    }
}
