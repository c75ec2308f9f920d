//! Push / pull / subscribe semantics over the store, the registry and the
//! replication coordinator.

use relayq_common::{Item, QueueError, QueueSnapshot};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::store::QueueStore;
use super::subscribers::{SubscriberChannel, SubscriberRegistry};
use crate::cluster::ReplicationCoordinator;

/// Entry points invoked by the HTTP and websocket adapters
pub struct QueueService {
    store: RwLock<QueueStore>,
    subscribers: SubscriberRegistry,
    replication: Arc<ReplicationCoordinator>,
}

impl QueueService {
    pub fn new(replication: Arc<ReplicationCoordinator>) -> Self {
        Self {
            store: RwLock::new(QueueStore::new()),
            subscribers: SubscriberRegistry::new(),
            replication,
        }
    }

    pub fn replication(&self) -> &Arc<ReplicationCoordinator> {
        &self.replication
    }

    /// Accept an item.
    ///
    /// With at least one local subscriber the queue is bypassed: peers are
    /// told to forget the key and the item goes straight to a subscriber.
    /// If every subscriber has left by dispatch time the item is enqueued.
    /// Otherwise it is enqueued and, unless `force` marks a peer-originated
    /// push, replicated to every peer.
    pub async fn push(&self, item: Item, force: bool) -> Result<Item, QueueError> {
        if self.subscribers.has_subscribers().await {
            self.replication.replicate_read(&item.key).await;
            match self.subscribers.dispatch(item.clone()).await {
                Ok(()) => {
                    tracing::debug!(key = %item.key, "Item dispatched to subscriber");
                    return Ok(item);
                }
                // The last subscriber left during the peer round trip
                Err(QueueError::NoSubscribers) => {
                    tracing::debug!(key = %item.key, "Subscribers gone, enqueueing instead");
                }
                Err(e) => return Err(e),
            }
        }

        self.store.write().await.push(item.clone())?;
        tracing::debug!(key = %item.key, force, "Item enqueued");

        if !force {
            self.replication.replicate_write(&item).await;
        }
        Ok(item)
    }

    /// Remove an item.
    ///
    /// A `key` is only honored on peer-originated (`force`) requests and
    /// deletes that key, returning `None`. Otherwise the head is pulled
    /// and peers are told to forget its key.
    pub async fn pull(&self, key: Option<&str>, force: bool) -> Result<Option<Item>, QueueError> {
        let key = if force { key.filter(|k| !k.is_empty()) } else { None };

        if let Some(key) = key {
            self.store.write().await.delete(key)?;
            tracing::debug!(key = %key, "Item forgotten on peer request");
            return Ok(None);
        }

        let item = self.store.write().await.pull()?;
        self.replication.replicate_read(&item.key).await;
        Ok(Some(item))
    }

    /// Register a websocket subscriber
    pub async fn subscribe(
        &self,
        identity: &str,
        channel: SubscriberChannel,
    ) -> Result<&'static str, QueueError> {
        self.subscribers.subscribe(identity, channel).await
    }

    /// Local only; never replicated
    pub async fn unsubscribe(&self, identity: &str) {
        self.subscribers.unsubscribe(identity).await;
    }

    /// Full local snapshot
    pub async fn copy(&self) -> QueueSnapshot {
        self.store.read().await.snapshot()
    }

    /// Seed the local queue from the first peer that serves a snapshot.
    ///
    /// Returns the number of items merged. On a duplicate key the merge
    /// stops and keeps what was merged before it.
    pub async fn bootstrap(&self) -> Result<usize, QueueError> {
        let snapshot = self.replication.bootstrap().await?;
        let mut store = self.store.write().await;
        let merged = store.bulk_merge(snapshot.list);
        match merged {
            Ok(n) => tracing::info!(merged = n, "Bootstrap complete"),
            Err(ref e) => tracing::warn!(error = %e, kept = store.len(), "Bootstrap merge stopped"),
        }
        merged
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.len().await
    }
}
