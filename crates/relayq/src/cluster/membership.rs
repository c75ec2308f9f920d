//! Read-only view of the gossip membership.
//!
//! Every query goes straight to the gossip state; nothing is cached here.

use relayq_common::{NodeRole, NodeState, QueueError};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::gossip::GossipService;

/// A cluster member as seen by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    /// Gossip transport address (`None` for self when bound to a wildcard)
    pub address: Option<SocketAddr>,
    /// Externally reachable API `host:port`
    pub metadata: String,
    pub state: NodeState,
    pub role: NodeRole,
}

impl Node {
    pub fn is_primary(&self) -> bool {
        self.role.is_primary()
    }
}

/// Membership directory injected into every component that needs peers
#[derive(Clone)]
pub struct MembershipDirectory {
    gossip: Arc<GossipService>,
}

impl MembershipDirectory {
    pub fn new(gossip: Arc<GossipService>) -> Self {
        Self { gossip }
    }

    /// The underlying gossip service
    #[cfg(test)]
    pub fn gossip(&self) -> &Arc<GossipService> {
        &self.gossip
    }

    /// This node
    pub fn local(&self) -> Node {
        let local = self.gossip.local();
        Node {
            name: local.name.clone(),
            address: None,
            metadata: local.metadata.clone(),
            state: NodeState::Alive,
            role: self.gossip.local_role(),
        }
    }

    /// Whether this node is the primary
    pub fn is_primary(&self) -> bool {
        self.gossip.local_role().is_primary()
    }

    /// Live members including self, self first
    pub async fn members(&self) -> Vec<Node> {
        let mut nodes = vec![self.local()];
        nodes.extend(self.peers().await);
        nodes
    }

    /// Live members excluding self, ordered by name
    pub async fn peers(&self) -> Vec<Node> {
        let mut peers: Vec<Node> = self
            .gossip
            .records()
            .await
            .into_iter()
            .filter(|(_, state)| state.is_live())
            .map(|(record, state)| Node {
                name: record.node.name,
                address: Some(record.address),
                metadata: record.node.metadata,
                state,
                role: record.role,
            })
            .collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }

    /// API endpoint of the primary member
    pub async fn locate_primary(&self) -> Result<String, QueueError> {
        if self.is_primary() {
            return Ok(self.gossip.local().metadata.clone());
        }

        self.peers()
            .await
            .into_iter()
            .find(Node::is_primary)
            .map(|node| node.metadata)
            .ok_or(QueueError::PrimaryNotFound)
    }
}
